//! GENA eventing for a device connection: SUBSCRIBE, renewal, UNSUBSCRIBE and
//! inbound NOTIFY requests.

use std::sync::Arc;
use std::time::Duration;

use callback_server::{InboundRequest, StatusCode};
use soap_client::gena::{self, NTS_PROPCHANGE, NT_EVENT};
use soap_client::SubscriptionTimeout;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::{ConnectionKey, ConnectionState, DeviceConnection};
use crate::device_tree::ServiceHandle;
use crate::error::{ControlPointError, Result, SubscriptionFailure, TransportError};
use crate::events::ConnectionEvent;
use crate::shared::SharedState;
use crate::subscription::{EventSubscription, SubscriptionPhase};
use crate::transport::{self, HttpRequest, HttpResponse};

impl DeviceConnection {
    /// Subscribe to a service's events.
    ///
    /// The request runs in the background; the outcome arrives as
    /// [`ConnectionEvent::Subscribed`] or [`ConnectionEvent::SubscriptionFailed`].
    pub fn subscribe_events(&self, service: ServiceHandle) -> Result<()> {
        let shared = &self.shared;
        let mut data = shared.lock();
        let state = data
            .connection_mut(&self.key)
            .ok_or(ControlPointError::NotConnected)?;

        let node = state
            .tree
            .service(service)
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown service handle".into()))?;
        if !node.connected {
            return Err(ControlPointError::ServiceNotConnected);
        }
        let event_url = node.descriptor.event_sub_url.clone().ok_or_else(|| {
            ControlPointError::InvalidArgument(format!(
                "{} does not publish events",
                node.descriptor.service_type
            ))
        })?;
        if state.subscription_for(service).is_some()
            || state.pending_subscribes.contains(&service)
        {
            return Err(ControlPointError::AlreadySubscribed);
        }

        let request = subscribe_request(
            event_url,
            &state.callback_url,
            shared.config().subscription_seconds(),
            &state.user_agent,
        )
        .map_err(|e| ControlPointError::Transport(e.to_string()))?;

        let request_id = shared.next_id();
        let task = tokio::spawn(run_subscribe(
            shared.clone(),
            state.key(),
            request_id,
            service,
            request,
        ));
        state.pending_subscribes.insert(service);
        state.track(request_id, task.abort_handle());
        debug!(udn = %state.udn, "SUBSCRIBE sent");
        Ok(())
    }

    /// Cancel a service's subscription.
    ///
    /// The subscription is dropped whatever the device answers, and
    /// [`ConnectionEvent::Unsubscribed`] follows. Calling this again while the
    /// UNSUBSCRIBE is in flight does nothing.
    pub fn unsubscribe_events(&self, service: ServiceHandle) -> Result<()> {
        let shared = &self.shared;
        let mut data = shared.lock();
        let state = data
            .connection_mut(&self.key)
            .ok_or(ControlPointError::NotConnected)?;

        let node = state
            .tree
            .service(service)
            .ok_or_else(|| ControlPointError::InvalidArgument("unknown service handle".into()))?;
        if !node.connected {
            return Err(ControlPointError::ServiceNotConnected);
        }
        let event_url = node.descriptor.event_sub_url.clone();

        let Some(subscription) = state.subscription_for(service) else {
            return Err(ControlPointError::NotSubscribed);
        };
        if subscription.phase() == SubscriptionPhase::Unsubscribing {
            return Ok(());
        }
        let sid = subscription.sid().to_string();
        start_unsubscribe(shared, state, &sid, event_url);
        Ok(())
    }
}

pub(crate) fn subscribe_request(
    url: Url,
    callback_url: &str,
    seconds: u32,
    user_agent: &str,
) -> std::result::Result<HttpRequest, TransportError> {
    Ok(HttpRequest::extension("SUBSCRIBE", url)?
        .header("CALLBACK", gena::callback_header(callback_url))
        .header("NT", NT_EVENT)
        .header("TIMEOUT", SubscriptionTimeout::Seconds(seconds).to_header())
        .header("USER-AGENT", user_agent))
}

pub(crate) fn renewal_request(
    url: Url,
    sid: &str,
    seconds: u32,
    user_agent: &str,
) -> std::result::Result<HttpRequest, TransportError> {
    Ok(HttpRequest::extension("SUBSCRIBE", url)?
        .header("SID", sid)
        .header("TIMEOUT", SubscriptionTimeout::Seconds(seconds).to_header())
        .header("USER-AGENT", user_agent))
}

pub(crate) fn unsubscribe_request(
    url: Url,
    sid: &str,
    user_agent: &str,
) -> std::result::Result<HttpRequest, TransportError> {
    Ok(HttpRequest::extension("UNSUBSCRIBE", url)?
        .header("SID", sid)
        .header("USER-AGENT", user_agent))
}

/// Duration the device granted. Missing, malformed and infinite values fall
/// back to what was requested.
fn granted_duration(response: &HttpResponse, requested: u32) -> Duration {
    match response.header("TIMEOUT").and_then(SubscriptionTimeout::parse) {
        Some(SubscriptionTimeout::Seconds(secs)) => Duration::from_secs(u64::from(secs)),
        Some(SubscriptionTimeout::Infinite) | None => Duration::from_secs(u64::from(requested)),
    }
}

fn parse_subscribe_response(
    result: std::result::Result<HttpResponse, TransportError>,
    requested: u32,
) -> std::result::Result<(String, Duration), SubscriptionFailure> {
    let response = result?;
    if response.status != StatusCode::OK {
        return Err(SubscriptionFailure::HttpStatus(response.status.as_u16()));
    }
    let sid = response
        .header("SID")
        .map(str::trim)
        .filter(|sid| !sid.is_empty())
        .ok_or(SubscriptionFailure::MissingSid)?
        .to_string();
    Ok((sid, granted_duration(&response, requested)))
}

async fn run_subscribe(
    shared: Arc<SharedState>,
    key: ConnectionKey,
    request_id: u64,
    service: ServiceHandle,
    request: HttpRequest,
) {
    let config = shared.config();
    let requested = config.subscription_seconds();
    let result = transport::send(shared.http(), request, config.subscription_request_timeout).await;
    let outcome = parse_subscribe_response(result, requested);

    let (events, event) = {
        let mut data = shared.lock();
        let Some(state) = data.connection_mut(&key) else {
            return;
        };
        state.in_flight.remove(&request_id);
        state.pending_subscribes.remove(&service);

        let event = match outcome {
            Ok((sid, granted)) => {
                let expires_at = Instant::now() + granted;
                match state.subscriptions.get_mut(&sid) {
                    Some(existing) => existing.refresh(expires_at),
                    None => {
                        let fresh = EventSubscription::new(sid.clone(), service, expires_at);
                        state.subscriptions.insert(sid.clone(), fresh);
                    }
                }
                state.rearm_renewal(config.renewal_gap);
                info!(udn = %key.udn, %sid, timeout_secs = granted.as_secs(), "subscribed");
                ConnectionEvent::Subscribed {
                    udn: key.udn.clone(),
                    service,
                    sid,
                }
            }
            Err(failure) => {
                warn!(udn = %key.udn, error = %failure, "SUBSCRIBE failed");
                ConnectionEvent::SubscriptionFailed {
                    udn: key.udn.clone(),
                    service,
                    failure,
                }
            }
        };
        (state.events.clone(), event)
    };
    let _ = events.send(event);
}

/// Send a renewal for one subscription. Returns false when the subscription's
/// service can no longer be reached.
fn start_renewal(shared: &Arc<SharedState>, state: &mut ConnectionState, sid: &str) -> bool {
    let Some(subscription) = state.subscriptions.get(sid) else {
        return false;
    };
    let service = subscription.service();
    let Some(event_url) = state
        .tree
        .service(service)
        .filter(|node| node.connected)
        .and_then(|node| node.descriptor.event_sub_url.clone())
    else {
        return false;
    };
    let Ok(request) = renewal_request(
        event_url,
        sid,
        shared.config().subscription_seconds(),
        &state.user_agent,
    ) else {
        return false;
    };

    if let Some(subscription) = state.subscriptions.get_mut(sid) {
        subscription.set_phase(SubscriptionPhase::Renewing);
    }
    let request_id = shared.next_id();
    let task = tokio::spawn(run_renewal(
        shared.clone(),
        state.key(),
        request_id,
        sid.to_string(),
        service,
        request,
    ));
    state.track(request_id, task.abort_handle());
    debug!(udn = %state.udn, %sid, "renewal sent");
    true
}

async fn run_renewal(
    shared: Arc<SharedState>,
    key: ConnectionKey,
    request_id: u64,
    sid: String,
    service: ServiceHandle,
    request: HttpRequest,
) {
    let config = shared.config();
    let requested = config.subscription_seconds();
    let timeout = config.subscription_request_timeout;
    let outcome = match transport::send(shared.http(), request, timeout).await {
        Ok(response) if response.status == StatusCode::OK => {
            Ok(granted_duration(&response, requested))
        }
        Ok(response) => Err(SubscriptionFailure::HttpStatus(response.status.as_u16())),
        Err(e) => Err(SubscriptionFailure::Transport(e)),
    };

    let (events, event) = {
        let mut data = shared.lock();
        let Some(state) = data.connection_mut(&key) else {
            return;
        };
        state.in_flight.remove(&request_id);

        // An UNSUBSCRIBE issued meanwhile wins over the renewal.
        let renewing = state
            .subscriptions
            .get(&sid)
            .is_some_and(|s| s.phase() == SubscriptionPhase::Renewing);
        if !renewing {
            return;
        }

        let event = match outcome {
            Ok(granted) => {
                if let Some(subscription) = state.subscriptions.get_mut(&sid) {
                    subscription.refresh(Instant::now() + granted);
                }
                debug!(udn = %key.udn, %sid, timeout_secs = granted.as_secs(), "subscription renewed");
                ConnectionEvent::SubscriptionRenewed {
                    udn: key.udn.clone(),
                    service,
                    sid,
                }
            }
            Err(failure) => {
                state.subscriptions.remove(&sid);
                warn!(udn = %key.udn, %sid, error = %failure, "renewal failed, subscription dropped");
                ConnectionEvent::SubscriptionFailed {
                    udn: key.udn.clone(),
                    service,
                    failure,
                }
            }
        };
        state.rearm_renewal(config.renewal_gap);
        (state.events.clone(), event)
    };
    let _ = events.send(event);
}

fn start_unsubscribe(
    shared: &Arc<SharedState>,
    state: &mut ConnectionState,
    sid: &str,
    event_url: Option<Url>,
) {
    let Some(subscription) = state.subscriptions.get_mut(sid) else {
        return;
    };
    subscription.set_phase(SubscriptionPhase::Unsubscribing);
    let service = subscription.service();
    state.rearm_renewal(shared.config().renewal_gap);

    let request = event_url.and_then(|url| unsubscribe_request(url, sid, &state.user_agent).ok());
    let request_id = shared.next_id();
    let task = tokio::spawn(run_unsubscribe(
        shared.clone(),
        state.key(),
        request_id,
        sid.to_string(),
        service,
        request,
    ));
    state.track(request_id, task.abort_handle());
}

async fn run_unsubscribe(
    shared: Arc<SharedState>,
    key: ConnectionKey,
    request_id: u64,
    sid: String,
    service: ServiceHandle,
    request: Option<HttpRequest>,
) {
    if let Some(request) = request {
        let timeout = shared.config().subscription_request_timeout;
        match transport::send(shared.http(), request, timeout).await {
            Ok(response) if response.status.is_success() => {}
            Ok(response) => {
                debug!(udn = %key.udn, %sid, status = response.status.as_u16(), "UNSUBSCRIBE refused")
            }
            Err(e) => debug!(udn = %key.udn, %sid, error = %e, "UNSUBSCRIBE failed"),
        }
    }

    let (events, event) = {
        let mut data = shared.lock();
        let Some(state) = data.connection_mut(&key) else {
            return;
        };
        state.in_flight.remove(&request_id);
        if state.subscriptions.remove(&sid).is_none() {
            return;
        }
        state.rearm_renewal(shared.config().renewal_gap);
        info!(udn = %key.udn, %sid, "unsubscribed");
        (
            state.events.clone(),
            ConnectionEvent::Unsubscribed {
                udn: key.udn.clone(),
                service,
                sid,
            },
        )
    };
    let _ = events.send(event);
}

/// Start renewals for `sids`. Subscriptions that cannot be renewed are
/// dropped and reported as failed.
fn renew_or_drop(shared: &Arc<SharedState>, state: &mut ConnectionState, sids: Vec<String>) {
    for sid in sids {
        if start_renewal(shared, state, &sid) {
            continue;
        }
        let Some(subscription) = state.subscriptions.remove(&sid) else {
            continue;
        };
        warn!(udn = %state.udn, %sid, "service unreachable, subscription dropped");
        let _ = state.events.send(ConnectionEvent::SubscriptionFailed {
            udn: state.udn.clone(),
            service: subscription.service(),
            failure: SubscriptionFailure::ServiceUnreachable,
        });
    }
    state.rearm_renewal(shared.config().renewal_gap);
}

/// Renew whatever the timer found due. Returns false once the connection is
/// gone, which stops the timer.
pub(crate) fn renew_due_subscriptions(shared: &Arc<SharedState>, key: &ConnectionKey) -> bool {
    let mut data = shared.lock();
    let Some(state) = data.connection_mut(key) else {
        return false;
    };
    let now = Instant::now();
    let gap = shared.config().renewal_gap;

    let due: Vec<String> = state
        .subscriptions
        .values()
        .filter(|s| s.is_due(now, gap))
        .map(|s| s.sid().to_string())
        .collect();
    renew_or_drop(shared, state, due);
    true
}

/// A rebooted device has forgotten its subscriptions; renew all of them.
pub(crate) fn on_device_rebooted(shared: &Arc<SharedState>, key: &ConnectionKey) {
    let mut data = shared.lock();
    let Some(state) = data.connection_mut(key) else {
        return;
    };
    let active: Vec<String> = state
        .subscriptions
        .values()
        .filter(|s| s.phase() == SubscriptionPhase::Active)
        .map(|s| s.sid().to_string())
        .collect();
    info!(udn = %key.udn, count = active.len(), "device rebooted, renewing subscriptions");
    renew_or_drop(shared, state, active);
}

/// Handle a NOTIFY routed to the connection of device `udn`.
pub(crate) fn handle_event_notification(
    shared: &Arc<SharedState>,
    udn: &str,
    request: &InboundRequest,
) -> StatusCode {
    if request.method.as_str() != "NOTIFY" {
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    if request.header("NT").map(str::trim) != Some(NT_EVENT)
        || request.header("NTS").map(str::trim) != Some(NTS_PROPCHANGE)
    {
        debug!(%udn, "NOTIFY with bad NT/NTS");
        return StatusCode::BAD_REQUEST;
    }
    let is_xml = request
        .header("CONTENT-TYPE")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"));
    if !is_xml {
        debug!(%udn, "NOTIFY without XML content type");
        return StatusCode::BAD_REQUEST;
    }
    let Some(sid) = request.header("SID").map(str::trim) else {
        return StatusCode::PRECONDITION_FAILED;
    };
    let Some(event_key) = request.header("SEQ").and_then(gena::parse_event_key) else {
        debug!(%udn, %sid, "NOTIFY with bad SEQ");
        return StatusCode::BAD_REQUEST;
    };

    let (events, event) = {
        let mut data = shared.lock();
        let Some(state) = data.control_point.connections.get_mut(udn) else {
            return StatusCode::PRECONDITION_FAILED;
        };
        let Some(service) = state.subscriptions.get(sid).map(|s| s.service()) else {
            debug!(%udn, %sid, "NOTIFY for unknown subscription");
            return StatusCode::PRECONDITION_FAILED;
        };
        if !state.tree.service(service).is_some_and(|node| node.connected) {
            state.subscriptions.remove(sid);
            state.rearm_renewal(shared.config().renewal_gap);
            return StatusCode::PRECONDITION_FAILED;
        }

        let threshold = shared.config().event_key_gap_threshold;
        let accepted = state
            .subscriptions
            .get_mut(sid)
            .is_some_and(|s| s.set_new_event_key(event_key, threshold));
        if !accepted {
            debug!(%udn, %sid, event_key, "event out of sequence, dropped");
            return StatusCode::OK;
        }

        let changes = match gena::decode_property_set(&request.body) {
            Ok(changes) => changes,
            Err(e) => {
                warn!(%udn, %sid, error = %e, "undecodable property set");
                return StatusCode::BAD_REQUEST;
            }
        };
        state.tree.apply_changes(service, &changes);
        (
            state.events.clone(),
            ConnectionEvent::PropertiesChanged {
                udn: state.udn.clone(),
                service,
                changes,
            },
        )
    };
    let _ = events.send(event);
    StatusCode::OK
}
