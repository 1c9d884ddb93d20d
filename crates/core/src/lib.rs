pub mod answer;
pub mod config;
pub mod errors;
pub mod sqlguard;
pub mod transform;

pub use answer::{
    narrative_fallback, suggest_format, validate_reply, AnswerFormat, AnswerMetadata,
    AnswerShapeError, ChartSeries, FormattedAnswer,
};
pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat, ProviderKind};
pub use errors::{
    ExecutionError, ProviderError, ProviderFailure, ProviderFailureKind, ValidationError,
};
pub use sqlguard::{prepare_query, validate_query, SqlGuardError};
pub use transform::{aggregate_records, coerce_numeric, filter_records, AggregateOp};
