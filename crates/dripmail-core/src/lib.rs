//! Dripmail Core - Drip campaign scheduling and delivery
//!
//! This crate provides the engine that walks every campaign contact through
//! its sequence: template rendering, SMTP delivery, per-contact timers,
//! campaign batch operations and startup recovery.

pub mod drip;

pub use drip::{
    AddContactsReport, Advance, BatchReport, CampaignController, Clock, ContactError, DeliveryError,
    DripEngine, DripError, Mailer, OutgoingEmail, RecoveryLoader, RecoveryReport, SmtpMailer,
    StepScheduler, SystemClock, TemplateRenderer, TimerError, TimerRegistry, TokioClock,
};
