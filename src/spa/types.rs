//! Domain models for the spa booking service.
//!
//! Field names follow the server's camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: i64,
  pub name: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  /// JWT issued at sign-in; absent on server-returned profile data
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token: Option<String>,
}

/// A bookable time slot, taken when `user_id` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
  pub id: i64,
  pub treatment_name: String,
  #[serde(default)]
  pub user_id: Option<i64>,
  pub date_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cancelled_at: Option<DateTime<Utc>>,
}

/// A staff member and the treatments they perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
  pub id: i64,
  pub name: String,
  pub treatment_names: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

/// A treatment on the menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
  pub id: i64,
  pub name: String,
  pub duration_in_minutes: u32,
  pub description: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_appointment_parses_server_json() {
    let appointment: Appointment = serde_json::from_value(json!({
      "id": 1,
      "treatmentName": "Massage",
      "userId": 7,
      "dateTime": "2024-03-01T10:00:00Z"
    }))
    .unwrap();

    assert_eq!(appointment.user_id, Some(7));
    assert!(appointment.cancelled_at.is_none());
  }

  #[test]
  fn test_user_token_is_not_serialized_when_absent() {
    let user = User {
      id: 9,
      name: "Mary".into(),
      email: "mary@example.com".into(),
      address: None,
      phone: None,
      token: None,
    };
    let value = serde_json::to_value(&user).unwrap();
    assert!(value.get("token").is_none());
  }
}
