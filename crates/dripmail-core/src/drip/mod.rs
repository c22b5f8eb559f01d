//! Drip Campaign Module - Sequence scheduling and delivery

mod controller;
mod delivery;
mod engine;
mod recovery;
mod scheduler;
mod template;
mod timers;

pub use controller::{AddContactsReport, BatchReport, CampaignController, ContactError, Jitter};
pub use delivery::{DeliveryError, Mailer, OutgoingEmail, SmtpMailer};
pub use engine::DripEngine;
pub use recovery::{RecoveryLoader, RecoveryReport};
pub use scheduler::{Advance, DripError, StepScheduler};
pub use template::{RenderedStep, TemplateRenderer};
pub use timers::{Clock, SystemClock, TimerError, TimerRegistry, TokioClock};
