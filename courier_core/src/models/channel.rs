use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Transport class for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
  Email,
  Sms,
  Push,
  InApp,
}

impl Channel {
  pub const ALL: [Channel; 4] = [Channel::Email, Channel::Sms, Channel::Push, Channel::InApp];

  pub fn as_str(&self) -> &'static str {
    match self {
      Channel::Email => "email",
      Channel::Sms => "sms",
      Channel::Push => "push",
      Channel::InApp => "in_app",
    }
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Channel {
  type Err = CoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "email" => Ok(Channel::Email),
      "sms" => Ok(Channel::Sms),
      "push" => Ok(Channel::Push),
      "in_app" => Ok(Channel::InApp),
      other => Err(CoreError::Validation(format!("unknown channel: {}", other))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_round_trip() {
    for channel in Channel::ALL {
      assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
    }
  }

  #[test]
  fn test_unknown_channel_rejected() {
    assert!("carrier_pigeon".parse::<Channel>().is_err());
  }
}
