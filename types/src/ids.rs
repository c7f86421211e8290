//! Snowflake identifiers.
//!
//! Discord ids are 64-bit and exceed the range JSON numbers can carry
//! losslessly, so they travel as decimal strings. Deserialization also
//! accepts plain numbers because some subprocess replies emit them raw.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid snowflake id: {0:?}")]
pub struct InvalidSnowflake(pub String);

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidSnowflake;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_snowflake(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(SnowflakeVisitor).map(Self)
            }
        }
    };
}

fn parse_snowflake(s: &str) -> Result<u64, InvalidSnowflake> {
    let trimmed = s.trim();
    match trimmed.parse::<u64>() {
        Ok(0) | Err(_) => Err(InvalidSnowflake(s.to_string())),
        Ok(id) => Ok(id),
    }
}

struct SnowflakeVisitor;

impl Visitor<'_> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-zero snowflake as a decimal string or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        if v == 0 {
            return Err(E::custom("snowflake id must be non-zero"));
        }
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v)
            .map_err(|_| E::custom("snowflake id must be positive"))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        parse_snowflake(v).map_err(E::custom)
    }
}

/// Deserialize an optional id field. The subprocess writes `0` for ids the
/// SDK left unset, so `0` and `null` both become `None`.
pub fn optional_snowflake<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<u64>,
{
    deserializer
        .deserialize_option(OptionalSnowflakeVisitor)
        .map(|id| id.map(T::from))
}

struct OptionalSnowflakeVisitor;

impl<'de> Visitor<'de> for OptionalSnowflakeVisitor {
    type Value = Option<u64>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snowflake, 0, or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok((v != 0).then_some(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map_err(|_| E::custom("snowflake id must be positive"))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.trim() == "0" {
            return Ok(None);
        }
        parse_snowflake(v).map(Some).map_err(E::custom)
    }
}

snowflake_id!(
    /// A lobby: an ephemeral group/session used for chat and voice.
    LobbyId
);
snowflake_id!(MessageId);
snowflake_id!(UserId);
snowflake_id!(GuildId);
snowflake_id!(ChannelId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&LobbyId::new(42)).unwrap();
        assert_eq!(json, r#""42""#);
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let from_str: MessageId = serde_json::from_str(r#""1234567890123456789""#).unwrap();
        assert_eq!(from_str.value(), 1_234_567_890_123_456_789);
        let from_num: MessageId = serde_json::from_str("17").unwrap();
        assert_eq!(from_num.value(), 17);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(serde_json::from_str::<UserId>(r#""0""#).is_err());
        assert!(serde_json::from_str::<UserId>("0").is_err());
        assert!(serde_json::from_str::<UserId>(r#""abc""#).is_err());
        assert!(serde_json::from_str::<UserId>("-5").is_err());
        assert!("".parse::<GuildId>().is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Optional {
        #[serde(default, deserialize_with = "optional_snowflake")]
        channel_id: Option<ChannelId>,
    }

    #[test]
    fn zero_optional_id_means_absent() {
        let parse = |raw: &str| serde_json::from_str::<Optional>(raw).unwrap().channel_id;
        assert_eq!(parse(r#"{"channel_id":"0"}"#), None);
        assert_eq!(parse(r#"{"channel_id":0}"#), None);
        assert_eq!(parse(r#"{"channel_id":null}"#), None);
        assert_eq!(parse("{}"), None);
        assert_eq!(parse(r#"{"channel_id":"31"}"#), Some(ChannelId::new(31)));
        assert!(serde_json::from_str::<Optional>(r#"{"channel_id":"x"}"#).is_err());
    }

    #[test]
    fn parse_trims_whitespace() {
        let id: ChannelId = " 99 ".parse().unwrap();
        assert_eq!(id, ChannelId::new(99));
    }
}
