//! SOAP envelopes for UPnP action invocation.

use xmltree::Element;

use crate::error::{SoapError, UpnpFault};

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

/// Build the request envelope for `action` on `service_type`.
///
/// Arguments are emitted in the order given; callers are responsible for
/// matching the order the service description declares.
pub fn encode_action_call(
    service_type: &str,
    action: &str,
    arguments: &[(String, String)],
) -> String {
    let payload: String = arguments
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape_text(value)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_ENVELOPE_NS}" s:encodingStyle="{SOAP_ENCODING_STYLE}"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#
    )
}

/// Value of the `SOAPACTION` header for `action` on `service_type`.
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

/// Extract the output arguments of a successful response, in document order.
///
/// A fault inside the body is reported as [`SoapError::Fault`].
pub fn decode_action_response(
    xml: &[u8],
    action: &str,
) -> Result<Vec<(String, String)>, SoapError> {
    let envelope = Element::parse(xml).map_err(|e| SoapError::Parse(e.to_string()))?;
    let body = envelope
        .get_child("Body")
        .ok_or_else(|| SoapError::MissingElement("Body".to_string()))?;

    if let Some(fault) = body.get_child("Fault") {
        return Err(SoapError::Fault(fault_from_element(fault)));
    }

    let response_name = format!("{action}Response");
    let response = body
        .get_child(response_name.as_str())
        .ok_or(SoapError::MissingElement(response_name))?;

    Ok(response
        .children
        .iter()
        .filter_map(|node| node.as_element())
        .map(|arg| {
            let value = arg.get_text().map(|t| t.into_owned()).unwrap_or_default();
            (arg.name.clone(), value)
        })
        .collect())
}

/// Decode the `<UPnPError>` of a fault response.
pub fn decode_fault(xml: &[u8]) -> Result<UpnpFault, SoapError> {
    let envelope = Element::parse(xml).map_err(|e| SoapError::Parse(e.to_string()))?;
    let fault = envelope
        .get_child("Body")
        .and_then(|body| body.get_child("Fault"))
        .ok_or_else(|| SoapError::MissingElement("Fault".to_string()))?;
    Ok(fault_from_element(fault))
}

fn fault_from_element(fault: &Element) -> UpnpFault {
    // Devices disagree on the capitalization of UPnPError
    let upnp_error = fault.get_child("detail").and_then(|detail| {
        detail
            .get_child("UPnPError")
            .or_else(|| detail.get_child("UpnPError"))
    });

    let code = upnp_error
        .and_then(|e| e.get_child("errorCode"))
        .and_then(|c| c.get_text())
        .and_then(|t| t.trim().parse::<u16>().ok())
        .unwrap_or(500);

    let description = upnp_error
        .and_then(|e| e.get_child("errorDescription"))
        .and_then(|d| d.get_text())
        .or_else(|| fault.get_child("faultstring").and_then(|s| s.get_text()))
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    UpnpFault { code, description }
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    #[test]
    fn test_encode_action_call_orders_and_escapes_arguments() {
        let body = encode_action_call(
            AVT,
            "SetAVTransportURI",
            &[
                ("InstanceID".to_string(), "0".to_string()),
                ("CurrentURI".to_string(), "http://host/a?b=1&c=<2>".to_string()),
            ],
        );

        assert!(body.contains(r#"<u:SetAVTransportURI xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">"#));
        let instance = body.find("<InstanceID>0</InstanceID>").unwrap();
        let uri = body
            .find("<CurrentURI>http://host/a?b=1&amp;c=&lt;2&gt;</CurrentURI>")
            .unwrap();
        assert!(instance < uri);

        // the envelope must be well-formed XML
        assert!(Element::parse(body.as_bytes()).is_ok());
    }

    #[test]
    fn test_soap_action_header() {
        assert_eq!(
            soap_action_header(AVT, "Play"),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Play\""
        );
    }

    #[test]
    fn test_decode_action_response_with_outputs() {
        let xml = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
                        <CurrentVolume>42</CurrentVolume>
                        <Channel>Master</Channel>
                    </u:GetVolumeResponse>
                </s:Body>
            </s:Envelope>
        "#;

        let outputs = decode_action_response(xml.as_bytes(), "GetVolume").unwrap();
        assert_eq!(
            outputs,
            vec![
                ("CurrentVolume".to_string(), "42".to_string()),
                ("Channel".to_string(), "Master".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_action_response_empty_output() {
        let xml = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <u:PlayResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
                </s:Body>
            </s:Envelope>
        "#;
        assert!(decode_action_response(xml.as_bytes(), "Play").unwrap().is_empty());
    }

    #[rstest]
    #[case::missing_body(
        r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"></s:Envelope>"#,
        "Body"
    )]
    #[case::missing_response(
        r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body></s:Body></s:Envelope>"#,
        "PlayResponse"
    )]
    fn test_decode_action_response_missing_elements(#[case] xml: &str, #[case] element: &str) {
        match decode_action_response(xml.as_bytes(), "Play") {
            Err(SoapError::MissingElement(name)) => assert_eq!(name, element),
            other => panic!("Expected SoapError::MissingElement, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_action_response_rejects_malformed_xml() {
        assert!(matches!(
            decode_action_response(b"<s:Envelope>", "Play"),
            Err(SoapError::Parse(_))
        ));
    }

    #[rstest]
    #[case::upnp_error("UPnPError")]
    #[case::sonos_spelling("UpnPError")]
    fn test_decode_fault_reads_upnp_error(#[case] tag: &str) {
        let xml = format!(
            r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Client</faultcode>
                        <faultstring>UPnPError</faultstring>
                        <detail>
                            <{tag} xmlns="urn:schemas-upnp-org:control-1-0">
                                <errorCode>718</errorCode>
                                <errorDescription>Invalid InstanceID</errorDescription>
                            </{tag}>
                        </detail>
                    </s:Fault>
                </s:Body>
            </s:Envelope>"#
        );

        let fault = decode_fault(xml.as_bytes()).unwrap();
        assert_eq!(
            fault,
            UpnpFault {
                code: 718,
                description: "Invalid InstanceID".to_string()
            }
        );

        match decode_action_response(xml.as_bytes(), "Play") {
            Err(SoapError::Fault(f)) => assert_eq!(f.code, 718),
            other => panic!("Expected SoapError::Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_fault_without_detail_defaults_to_500() {
        let xml = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Server</faultcode>
                        <faultstring>Internal Error</faultstring>
                    </s:Fault>
                </s:Body>
            </s:Envelope>
        "#;

        let fault = decode_fault(xml.as_bytes()).unwrap();
        assert_eq!(fault.code, 500);
        assert_eq!(fault.description, "Internal Error");
    }
}
