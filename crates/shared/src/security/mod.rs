//! Prompt-injection defences: inbound and outbound screening plus incident
//! recording and alerting.

pub mod counter;
pub mod incidents;
pub mod input;
pub mod notifier;
pub mod output;
mod rules;

pub use counter::{AttemptCounter, CounterError, InMemoryAttemptCounter, RedisAttemptCounter};
pub use incidents::{IncidentOutcome, IncidentReport, SecurityIncidentLogger};
pub use input::{INPUT_REJECTION_MESSAGE, InputRejection, InputScreen, InputValidator, InputVerdict, sanitize};
pub use notifier::{NotifyError, Notifier, WebhookNotifier};
pub use output::{OUTPUT_REFUSAL_MESSAGE, OutputScreen, OutputValidator, OutputVerdict};
pub use rules::{RuleError, RuleSpec};
