//! SOAP action invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use reqwest::{Method, StatusCode};
use soap_client::{SoapError, CONTENT_TYPE_XML};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ConnectionKey, DeviceConnection};
use crate::device_tree::{ActionHandle, ActionNode};
use crate::error::{ActionError, ControlPointError, Result, TransportError};
use crate::shared::SharedState;
use crate::transport::{self, HttpRequest, HttpResponse};

/// Output arguments of a successful action, in the order the device sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    values: Vec<(String, String)>,
}

impl ActionOutput {
    pub(crate) fn new(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, String)> {
        self.values
    }
}

/// An action request in flight.
///
/// Resolves to the action's outcome. If the connection closes before the
/// device answers, it resolves to [`ActionError::Aborted`].
#[derive(Debug)]
pub struct PendingAction {
    action: String,
    receiver: oneshot::Receiver<std::result::Result<ActionOutput, ActionError>>,
}

impl PendingAction {
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Future for PendingAction {
    type Output = std::result::Result<ActionOutput, ActionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ActionError::Aborted {
                action: self.action.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl DeviceConnection {
    /// Invoke an action with its input arguments.
    ///
    /// Every input the service description declares must be given exactly
    /// once; they are sent in declaration order whatever order they are
    /// passed in. Validation errors are returned immediately, everything
    /// after that through the returned [`PendingAction`].
    pub fn call_action<I, K, V>(&self, action: ActionHandle, arguments: I) -> Result<PendingAction>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let provided: Vec<(String, String)> = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let shared = &self.shared;
        let mut data = shared.lock();
        let state = data
            .connection_mut(&self.key)
            .ok_or(ControlPointError::NotConnected)?;

        let node = state
            .tree
            .action(action)
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown action handle".into()))?;
        let service = state
            .tree
            .service(node.service)
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown action handle".into()))?;
        if !service.connected {
            return Err(ControlPointError::ServiceNotConnected);
        }

        let ordered = order_arguments(node, provided)?;
        let service_type = service.descriptor.service_type.to_string();
        let body = soap_client::encode_action_call(&service_type, &node.name, &ordered);
        let request = HttpRequest::new(Method::POST, service.descriptor.control_url.clone())
            .header("CONTENT-TYPE", CONTENT_TYPE_XML)
            .header("SOAPACTION", soap_client::soap_action_header(&service_type, &node.name))
            .header("USER-AGENT", state.user_agent.clone())
            .body(body);
        let name = node.name.clone();

        let (sender, receiver) = oneshot::channel();
        let request_id = shared.next_id();
        let task = tokio::spawn(run_action(
            shared.clone(),
            state.key(),
            request_id,
            name.clone(),
            request,
            sender,
        ));
        state.track(request_id, task.abort_handle());
        debug!(udn = %state.udn, action = %name, "action invoked");

        Ok(PendingAction {
            action: name,
            receiver,
        })
    }
}

/// Match provided arguments against the action's inputs and put them in
/// declaration order.
fn order_arguments(
    action: &ActionNode,
    provided: Vec<(String, String)>,
) -> Result<Vec<(String, String)>> {
    for (index, (name, _)) in provided.iter().enumerate() {
        if !action.inputs().any(|arg| arg.name == *name) {
            return Err(ControlPointError::InvalidArgument(format!(
                "{name} is not an input argument of {}",
                action.name
            )));
        }
        if provided[..index].iter().any(|(earlier, _)| earlier == name) {
            return Err(ControlPointError::InvalidArgument(format!(
                "{name} given more than once"
            )));
        }
    }

    action
        .inputs()
        .map(|arg| {
            provided
                .iter()
                .find(|(name, _)| *name == arg.name)
                .cloned()
                .ok_or_else(|| {
                    ControlPointError::InvalidArgument(format!(
                        "missing input argument {} of {}",
                        arg.name, action.name
                    ))
                })
        })
        .collect()
}

async fn run_action(
    shared: Arc<SharedState>,
    key: ConnectionKey,
    request_id: u64,
    action: String,
    request: HttpRequest,
    sender: oneshot::Sender<std::result::Result<ActionOutput, ActionError>>,
) {
    let result = transport::send(shared.http(), request, shared.config().action_timeout).await;

    if let Some(state) = shared.lock().connection_mut(&key) {
        state.in_flight.remove(&request_id);
    }

    let outcome = interpret_response(&action, result);
    if let Err(e) = &outcome {
        warn!(udn = %key.udn, error = %e, "action failed");
    }
    let _ = sender.send(outcome);
}

fn interpret_response(
    action: &str,
    result: std::result::Result<HttpResponse, TransportError>,
) -> std::result::Result<ActionOutput, ActionError> {
    let response = result.map_err(|source| ActionError::Transport {
        action: action.to_string(),
        source,
    })?;

    match response.status {
        StatusCode::OK => {
            if !response.is_xml() {
                return Err(ActionError::ContentType {
                    action: action.to_string(),
                    content_type: response.header("content-type").unwrap_or_default().to_string(),
                });
            }
            soap_client::decode_action_response(&response.body, action)
                .map(ActionOutput::new)
                .map_err(|e| match e {
                    SoapError::Fault(fault) => ActionError::Remote {
                        action: action.to_string(),
                        code: fault.code,
                        description: fault.description,
                    },
                    other => ActionError::Decode {
                        action: action.to_string(),
                        reason: other.to_string(),
                    },
                })
        }
        StatusCode::INTERNAL_SERVER_ERROR if response.is_xml() => {
            match soap_client::decode_fault(&response.body) {
                Ok(fault) => Err(ActionError::Remote {
                    action: action.to_string(),
                    code: fault.code,
                    description: fault.description,
                }),
                Err(_) => Err(ActionError::Http {
                    action: action.to_string(),
                    status: 500,
                }),
            }
        }
        status => Err(ActionError::Http {
            action: action.to_string(),
            status: status.as_u16(),
        }),
    }
}
