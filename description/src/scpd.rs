//! Service description (SCPD) parsing.

use serde::Deserialize;

use crate::error::{DescriptionError, Result};

/// A service control protocol description: the actions a service accepts and
/// the state variables it maintains.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    pub action_list: Option<ActionList>,
    pub service_state_table: Option<ServiceStateTable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionList {
    #[serde(rename = "action", default)]
    pub actions: Vec<ActionElement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionElement {
    pub name: String,
    pub argument_list: Option<ArgumentList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArgumentList {
    #[serde(rename = "argument", default)]
    pub arguments: Vec<ArgumentElement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentElement {
    pub name: String,
    /// `in` or `out`
    pub direction: String,
    pub related_state_variable: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceStateTable {
    #[serde(rename = "stateVariable", default)]
    pub variables: Vec<StateVariableElement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateVariableElement {
    #[serde(rename = "@sendEvents")]
    pub send_events: Option<String>,
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    pub default_value: Option<String>,
    pub allowed_value_list: Option<AllowedValueList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllowedValueList {
    #[serde(rename = "allowedValue", default)]
    pub values: Vec<String>,
}

impl ServiceDescription {
    /// Parse a service description from XML.
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| DescriptionError::Parse(format!("Failed to parse service XML: {e}")))
    }

    pub fn actions(&self) -> &[ActionElement] {
        self.action_list
            .as_ref()
            .map(|l| l.actions.as_slice())
            .unwrap_or_default()
    }

    pub fn action(&self, name: &str) -> Option<&ActionElement> {
        self.actions().iter().find(|a| a.name == name)
    }

    pub fn state_variables(&self) -> &[StateVariableElement] {
        self.service_state_table
            .as_ref()
            .map(|t| t.variables.as_slice())
            .unwrap_or_default()
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariableElement> {
        self.state_variables().iter().find(|v| v.name == name)
    }
}

impl ActionElement {
    pub fn arguments(&self) -> &[ArgumentElement] {
        self.argument_list
            .as_ref()
            .map(|l| l.arguments.as_slice())
            .unwrap_or_default()
    }

    /// Input arguments in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = &ArgumentElement> {
        self.arguments().iter().filter(|a| a.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ArgumentElement> {
        self.arguments().iter().filter(|a| !a.is_input())
    }
}

impl ArgumentElement {
    pub fn is_input(&self) -> bool {
        self.direction.trim().eq_ignore_ascii_case("in")
    }
}

impl StateVariableElement {
    /// Whether changes are delivered through eventing. An absent attribute
    /// means `yes`.
    pub fn sends_events(&self) -> bool {
        self.send_events
            .as_deref()
            .map(|v| !v.trim().eq_ignore_ascii_case("no"))
            .unwrap_or(true)
    }

    pub fn allowed_values(&self) -> &[String] {
        self.allowed_value_list
            .as_ref()
            .map(|l| l.values.as_slice())
            .unwrap_or_default()
    }
}
