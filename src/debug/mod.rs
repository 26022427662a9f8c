// Debug module - opt-in diagnostics for generation runs

pub mod pipeline_tracer;
