//! Spa booking domain: models, HTTP transport, and engine-level operations.

mod client;
mod service;
mod types;

pub use client::SpaClient;
pub use service::{
  appointment_key, appointments_key, filter_by_treatment, staff_key, user_appointments_key,
  user_key, SpaService,
};
pub use types::{Appointment, Staff, Treatment, User};
