use super::*;

/// Helper to create PeakFeatures for testing
#[allow(clippy::too_many_arguments)]
fn create_features(
    centroid: f32,
    rolloff: f32,
    flatness: f32,
    zcr: f32,
    decay_time_ms: f32,
    low: f32,
    mid: f32,
    high: f32,
) -> PeakFeatures {
    PeakFeatures {
        centroid,
        rolloff,
        flatness,
        zcr,
        decay_time_ms,
        low_band_ratio: low,
        mid_band_ratio: mid,
        high_band_ratio: high,
    }
}

fn kick() -> PeakFeatures {
    create_features(179.0, 129.0, 0.007, 0.003, 97.8, 0.998, 0.002, 0.0)
}

fn snare() -> PeakFeatures {
    create_features(6976.0, 4996.0, 0.684, 0.127, 127.7, 0.531, 0.279, 0.191)
}

fn closed_hihat() -> PeakFeatures {
    create_features(13385.0, 19638.0, 0.635, 0.467, 65.9, 0.0, 0.014, 0.986)
}

fn open_hihat() -> PeakFeatures {
    create_features(13467.0, 20457.0, 0.636, 0.457, 229.5, 0.0, 0.014, 0.986)
}

fn crash() -> PeakFeatures {
    create_features(12190.0, 19035.0, 0.817, 0.427, 385.1, 0.0, 0.071, 0.929)
}

fn ride() -> PeakFeatures {
    create_features(8533.0, 5857.0, 0.553, 0.164, 393.1, 0.0, 0.327, 0.673)
}

fn high_tom() -> PeakFeatures {
    create_features(461.0, 345.0, 0.018, 0.011, 400.0, 0.012, 0.988, 0.0)
}

fn low_tom() -> PeakFeatures {
    create_features(233.0, 172.0, 0.009, 0.005, 354.2, 0.995, 0.005, 0.0)
}

fn reference_set() -> Vec<(DrumComponent, PeakFeatures)> {
    vec![
        (DrumComponent::Kick, kick()),
        (DrumComponent::Snare, snare()),
        (DrumComponent::HiHatClosed, closed_hihat()),
        (DrumComponent::HiHatOpen, open_hihat()),
        (DrumComponent::Crash, crash()),
        (DrumComponent::Ride, ride()),
        (DrumComponent::TomHigh, high_tom()),
        (DrumComponent::TomLow, low_tom()),
    ]
}

#[test]
fn test_heuristic_classifies_reference_shapes() {
    let classifier = HeuristicClassifier::default();

    for (expected, features) in reference_set() {
        let result = classifier.classify(&features);
        assert_eq!(
            result.component,
            Some(expected),
            "Expected {} for {:?}",
            expected,
            features
        );
        assert!(
            (0.0..=1.0).contains(&result.confidence),
            "Confidence should be between 0.0 and 1.0, got {}",
            result.confidence
        );
    }
}

#[test]
fn test_heuristic_confident_on_clear_kick() {
    let classifier = HeuristicClassifier::default();
    let result = classifier.classify(&kick());
    assert!(result.confidence > 0.8, "confidence {}", result.confidence);
}

#[test]
fn test_heuristic_kick_vs_low_tom_by_decay() {
    let classifier = HeuristicClassifier::default();

    let mut features = kick();
    features.decay_time_ms = 150.0;
    assert_eq!(
        classifier.classify(&features).component,
        Some(DrumComponent::Kick)
    );

    features.decay_time_ms = 250.0;
    assert_eq!(
        classifier.classify(&features).component,
        Some(DrumComponent::TomLow)
    );
}

#[test]
fn test_heuristic_hihat_decay_boundaries() {
    let classifier = HeuristicClassifier::default();
    let mut features = closed_hihat();

    features.decay_time_ms = 119.0;
    assert_eq!(
        classifier.classify(&features).component,
        Some(DrumComponent::HiHatClosed)
    );

    features.decay_time_ms = 121.0;
    assert_eq!(
        classifier.classify(&features).component,
        Some(DrumComponent::HiHatOpen)
    );

    features.decay_time_ms = 331.0;
    assert_eq!(
        classifier.classify(&features).component,
        Some(DrumComponent::Crash)
    );
}

#[test]
fn test_heuristic_unknown_for_ambiguous_shape() {
    let classifier = HeuristicClassifier::default();

    // Neither tonal nor noisy, no dominant band
    let features = create_features(2000.0, 3000.0, 0.25, 0.1, 100.0, 0.35, 0.35, 0.3);
    assert_eq!(classifier.classify(&features), Classification::unknown());
}

#[test]
fn test_heuristic_unknown_for_silence() {
    let classifier = HeuristicClassifier::default();
    let result = classifier.classify(&PeakFeatures::default());
    assert_eq!(result.component, None);
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn test_custom_thresholds_change_decision() {
    let classifier = HeuristicClassifier::new(HeuristicThresholds {
        kick_max_decay_ms: 50.0,
        ..HeuristicThresholds::default()
    });
    assert_eq!(
        classifier.classify(&kick()).component,
        Some(DrumComponent::TomLow)
    );
}

#[test]
fn test_prototype_classifies_reference_shapes() {
    let classifier = PrototypeClassifier::built_in();

    for (expected, features) in reference_set() {
        let result = classifier.classify(&features);
        assert_eq!(result.component, Some(expected), "for {:?}", features);
        assert!(result.confidence > 0.5, "confidence {}", result.confidence);
    }
}

#[test]
fn test_prototype_rejects_distant_shapes() {
    let classifier = PrototypeClassifier::built_in();

    // Bright, tonal and long: far from every prototype
    let features = create_features(18000.0, 20000.0, 0.0, 0.9, 0.0, 0.5, 0.0, 0.5);
    assert_eq!(classifier.classify(&features).component, None);
}

#[test]
fn test_prototype_model_json_roundtrip() {
    let path = std::env::temp_dir().join(format!(
        "drumchart_prototypes_{}.json",
        std::process::id()
    ));
    let model = PrototypeModel::built_in();
    std::fs::write(&path, serde_json::to_string_pretty(&model).unwrap()).unwrap();

    let loaded = PrototypeModel::load_from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, model);
}

#[test]
fn test_prototype_model_rejects_empty_set() {
    let path = std::env::temp_dir().join(format!(
        "drumchart_prototypes_empty_{}.json",
        std::process::id()
    ));
    std::fs::write(&path, r#"{ "rejection_distance": 0.5, "prototypes": [] }"#).unwrap();

    let result = PrototypeModel::load_from_file(&path);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(GenerationError::ConfigInvalid { .. })));
}

#[test]
fn test_classifiers_are_trait_objects() {
    let classifiers: Vec<Box<dyn PeakClassifier>> = vec![
        Box::new(HeuristicClassifier::default()),
        Box::new(PrototypeClassifier::built_in()),
    ];
    let names: Vec<&str> = classifiers.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["heuristic", "prototype"]);
    for classifier in &classifiers {
        assert_eq!(
            classifier.classify(&snare()).component,
            Some(DrumComponent::Snare)
        );
    }
}

#[test]
fn test_component_labels_and_families() {
    assert_eq!(DrumComponent::HiHatOpen.label(), "hihat_open");
    assert_eq!(DrumComponent::HiHatOpen.family(), InstrumentFamily::HiHat);
    assert_eq!(DrumComponent::Ride.family(), InstrumentFamily::Cymbal);
    assert_eq!(DrumComponent::TomLow.family(), InstrumentFamily::Tom);
    assert_eq!(DrumComponent::ALL.len(), 8);
}
