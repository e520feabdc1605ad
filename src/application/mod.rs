// Feature pipeline: scaling, windowing, evaluation
pub mod features;

// Service surface consumed by the API layer
pub mod forecast_service;

// Symbol-scoped model registry with single-flight training
pub mod model_cache;

// Periodic data refresh and retraining
pub mod scheduler;

// System orchestrator
pub mod system;
