//! GENA eventing messages: headers of SUBSCRIBE/UNSUBSCRIBE exchanges and the
//! property sets delivered by NOTIFY.

use xmltree::Element;

use crate::error::SoapError;

pub const NT_EVENT: &str = "upnp:event";
pub const NTS_PROPCHANGE: &str = "upnp:propchange";

/// One `<e:property>` entry of a property set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub name: String,
    pub value: String,
}

/// Subscription duration as carried by the `TIMEOUT` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTimeout {
    Seconds(u32),
    Infinite,
}

impl SubscriptionTimeout {
    /// Parse `Second-1800` or `infinite`, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("infinite") || value.eq_ignore_ascii_case("second-infinite") {
            return Some(Self::Infinite);
        }
        let prefix = value.get(..7)?;
        if !prefix.eq_ignore_ascii_case("second-") {
            return None;
        }
        value[7..].parse::<u32>().ok().map(Self::Seconds)
    }

    pub fn to_header(self) -> String {
        match self {
            Self::Seconds(secs) => format!("Second-{secs}"),
            Self::Infinite => "infinite".to_string(),
        }
    }
}

/// Value of the `CALLBACK` header for a single delivery URL.
pub fn callback_header(url: &str) -> String {
    format!("<{url}>")
}

/// Parse the `SEQ` header of a NOTIFY request.
pub fn parse_event_key(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

/// Decode the body of a NOTIFY request into its property changes.
///
/// Values are returned unescaped; a property whose value is itself XML (such
/// as `LastChange`) arrives as its text content.
pub fn decode_property_set(xml: &[u8]) -> Result<Vec<PropertyChange>, SoapError> {
    let root = Element::parse(xml).map_err(|e| SoapError::Parse(e.to_string()))?;
    if root.name != "propertyset" {
        return Err(SoapError::MissingElement("propertyset".to_string()));
    }

    Ok(root
        .children
        .iter()
        .filter_map(|node| node.as_element())
        .filter(|e| e.name == "property")
        .flat_map(|property| property.children.iter().filter_map(|node| node.as_element()))
        .map(|variable| PropertyChange {
            name: variable.name.clone(),
            value: variable.get_text().map(|t| t.into_owned()).unwrap_or_default(),
        })
        .collect())
}
