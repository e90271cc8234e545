use roxmltree::{Document, Node};
use uuid::Uuid;

use super::{decode_ps_string, PsObject, PsProperty, PsValue};
use crate::PsrpError;

/// Parse one CLIXML element tree back into a value.
pub fn from_clixml(data: &[u8]) -> Result<PsValue, PsrpError> {
    let text = std::str::from_utf8(data)
        .map_err(|e| PsrpError::InvalidMessage(format!("message body is not UTF-8: {e}")))?;
    let doc = Document::parse(text)?;
    value_from_node(doc.root_element())
}

pub(crate) fn value_from_node(node: Node<'_, '_>) -> Result<PsValue, PsrpError> {
    let text = || node.text().unwrap_or_default();

    match node.tag_name().name() {
        "Nil" => Ok(PsValue::Nil),
        "B" => match text() {
            "true" => Ok(PsValue::Bool(true)),
            "false" => Ok(PsValue::Bool(false)),
            other => Err(PsrpError::InvalidMessage(format!(
                "invalid boolean literal: {other:?}"
            ))),
        },
        "I32" => text()
            .parse()
            .map(PsValue::I32)
            .map_err(|e| PsrpError::InvalidMessage(format!("invalid I32: {e}"))),
        "I64" => text()
            .parse()
            .map(PsValue::I64)
            .map_err(|e| PsrpError::InvalidMessage(format!("invalid I64: {e}"))),
        "S" | "ToString" => Ok(PsValue::Str(decode_ps_string(text()))),
        "Version" => Ok(PsValue::Version(text().to_string())),
        "G" => Uuid::parse_str(text())
            .map(PsValue::Guid)
            .map_err(|e| PsrpError::InvalidMessage(format!("invalid GUID: {e}"))),
        "LST" | "IE" => {
            let items = node
                .children()
                .filter(Node::is_element)
                .map(value_from_node)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PsValue::List(items))
        }
        "DCT" => {
            let mut entries = Vec::new();
            for entry in node.children().filter(Node::is_element) {
                let mut key = None;
                let mut value = None;
                for child in entry.children().filter(Node::is_element) {
                    match child.attribute("N") {
                        Some("Key") => key = Some(value_from_node(child)?),
                        Some("Value") => value = Some(value_from_node(child)?),
                        _ => {}
                    }
                }
                let (Some(key), Some(value)) = (key, value) else {
                    return Err(PsrpError::InvalidMessage(
                        "dictionary entry missing Key or Value".to_string(),
                    ));
                };
                entries.push((key, value));
            }
            Ok(PsValue::Dict(entries))
        }
        "Obj" => object_from_node(node).map(PsValue::object),
        other => Err(PsrpError::InvalidMessage(format!(
            "unknown CLIXML element <{other}>"
        ))),
    }
}

fn object_from_node(node: Node<'_, '_>) -> Result<PsObject, PsrpError> {
    let mut obj = PsObject::default();

    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "TN" => {
                obj.type_names = child
                    .children()
                    .filter(Node::is_element)
                    .map(|t| t.text().unwrap_or_default().to_string())
                    .collect();
            }
            "TNRef" => {}
            "ToString" => {
                obj.to_string = Some(decode_ps_string(child.text().unwrap_or_default()));
            }
            "MS" | "Props" => {
                for prop in child.children().filter(Node::is_element) {
                    let name = prop.attribute("N").ok_or_else(|| {
                        PsrpError::InvalidMessage(
                            "object property without an N attribute".to_string(),
                        )
                    })?;
                    obj.properties.push(PsProperty {
                        name: name.to_string(),
                        value: value_from_node(prop)?,
                    });
                }
            }
            _ => {
                if obj.value.is_some() {
                    return Err(PsrpError::InvalidMessage(
                        "object carries more than one wrapped value".to_string(),
                    ));
                }
                obj.value = Some(value_from_node(child)?);
            }
        }
    }

    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::super::to_clixml;
    use super::*;

    fn round_trip(value: &PsValue) {
        let xml = to_clixml(value).unwrap();
        let parsed = from_clixml(&xml).unwrap();
        assert_eq!(&parsed, value, "{}", String::from_utf8_lossy(&xml));
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(&PsValue::Nil);
        round_trip(&PsValue::Bool(true));
        round_trip(&PsValue::I32(-42));
        round_trip(&PsValue::I64(1 << 40));
        round_trip(&PsValue::Str("Write-Output 'hi'".to_string()));
        round_trip(&PsValue::Version("2.3".to_string()));
        round_trip(&PsValue::Guid(Uuid::new_v4()));
    }

    #[test]
    fn string_with_newline_round_trips() {
        round_trip(&PsValue::Str("a\nb\u{0}c".to_string()));
    }

    #[test]
    fn containers_round_trip() {
        round_trip(&PsValue::List(vec![
            PsValue::I32(1),
            PsValue::Str("two".to_string()),
            PsValue::Nil,
        ]));
        round_trip(&PsValue::Dict(vec![
            (PsValue::str("name"), PsValue::str("pwsh")),
            (PsValue::str("count"), PsValue::I32(3)),
        ]));
    }

    #[test]
    fn object_round_trips() {
        let mut obj = PsObject::with_type(&[
            "System.Management.Automation.PSCustomObject",
            "System.Object",
        ]);
        obj.to_string = Some("custom".to_string());
        obj.push_property("Name", PsValue::str("server"));
        obj.push_property("Nested", PsValue::List(vec![PsValue::Bool(false)]));
        round_trip(&PsValue::object(obj));
    }

    #[test]
    fn extended_primitive_object_round_trips() {
        let mut obj = PsObject::with_type(&["System.Management.Automation.Remoting.RemoteHostMethodId"]);
        obj.to_string = Some("WriteLine2".to_string());
        obj.value = Some(PsValue::I32(16));
        round_trip(&PsValue::object(obj));
    }

    #[test]
    fn xml_markup_in_strings_round_trips() {
        round_trip(&PsValue::Str("<Obj N=\"x\">&amp;</Obj>".to_string()));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(from_clixml(b"<Unknown/>").is_err());
        assert!(from_clixml(b"not xml at all").is_err());
        assert!(from_clixml(b"<I32>forty</I32>").is_err());
    }
}
