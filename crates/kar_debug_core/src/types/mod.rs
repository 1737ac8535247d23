mod actor;
mod breakpoint;
mod busy;
mod pause;

pub use actor::ActorRef;
pub use breakpoint::{Breakpoint, BreakpointScope};
pub use busy::{BusySnapshot, HandlingEntry, SentEntry};
pub use pause::{request_info, PauseRecord, Phase, RequestInfo};

#[cfg(test)]
pub(crate) use busy::fixtures;

use serde::{Deserialize, Deserializer};

/// The node encodes "no value" as an empty string on several optional fields.
pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

/// Accepts `true` as well as the string `"true"` some peers send for flags.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        Some(BoolOrString::Bool(b)) => b,
        Some(BoolOrString::String(s)) => s.eq_ignore_ascii_case("true"),
        None => false,
    })
}
