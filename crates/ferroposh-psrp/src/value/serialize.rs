use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{encode_ps_string, PsObject, PsValue};
use crate::PsrpError;

/// Serialize a value to its CLIXML element form.
///
/// The output is a single root element (no XML declaration), which is
/// exactly what a PSRP message body carries after its binary header.
pub fn to_clixml(value: &PsValue) -> Result<Vec<u8>, PsrpError> {
    let mut writer = Writer::new(Vec::new());
    let mut ref_id = 0u32;
    write_value(&mut writer, value, None, &mut ref_id)?;
    Ok(writer.into_inner())
}

fn write_value(
    writer: &mut Writer<Vec<u8>>,
    value: &PsValue,
    name: Option<&str>,
    ref_id: &mut u32,
) -> Result<(), PsrpError> {
    match value {
        PsValue::Nil => write_empty(writer, "Nil", name),
        PsValue::Bool(b) => write_text(writer, "B", name, if *b { "true" } else { "false" }),
        PsValue::I32(v) => write_text(writer, "I32", name, &v.to_string()),
        PsValue::I64(v) => write_text(writer, "I64", name, &v.to_string()),
        PsValue::Str(s) => write_text(writer, "S", name, &encode_ps_string(s)),
        PsValue::Version(s) => write_text(writer, "Version", name, s),
        PsValue::Guid(g) => write_text(writer, "G", name, &g.to_string()),
        PsValue::List(items) => {
            write_start(writer, "LST", name, None)?;
            for item in items {
                write_value(writer, item, None, ref_id)?;
            }
            write_end(writer, "LST")
        }
        PsValue::Dict(entries) => {
            write_start(writer, "DCT", name, None)?;
            for (key, val) in entries {
                write_start(writer, "En", None, None)?;
                write_value(writer, key, Some("Key"), ref_id)?;
                write_value(writer, val, Some("Value"), ref_id)?;
                write_end(writer, "En")?;
            }
            write_end(writer, "DCT")
        }
        PsValue::Object(obj) => write_object(writer, obj, name, ref_id),
    }
}

fn write_object(
    writer: &mut Writer<Vec<u8>>,
    obj: &PsObject,
    name: Option<&str>,
    ref_id: &mut u32,
) -> Result<(), PsrpError> {
    let obj_ref = *ref_id;
    *ref_id += 1;
    write_start(writer, "Obj", name, Some(obj_ref))?;

    if !obj.type_names.is_empty() {
        let tn_ref = *ref_id;
        *ref_id += 1;
        write_start(writer, "TN", None, Some(tn_ref))?;
        for type_name in &obj.type_names {
            write_text(writer, "T", None, type_name)?;
        }
        write_end(writer, "TN")?;
    }

    if let Some(to_string) = &obj.to_string {
        write_text(writer, "ToString", None, &encode_ps_string(to_string))?;
    }

    if let Some(value) = &obj.value {
        write_value(writer, value, None, ref_id)?;
    }

    if !obj.properties.is_empty() {
        write_start(writer, "MS", None, None)?;
        for property in &obj.properties {
            write_value(writer, &property.value, Some(&property.name), ref_id)?;
        }
        write_end(writer, "MS")?;
    }

    write_end(writer, "Obj")
}

fn element(tag: &str, name: Option<&str>, ref_id: Option<u32>) -> BytesStart<'static> {
    let mut start = BytesStart::new(tag.to_string());
    if let Some(ref_id) = ref_id {
        start.push_attribute(("RefId", ref_id.to_string().as_str()));
    }
    if let Some(name) = name {
        start.push_attribute(("N", name));
    }
    start
}

fn write_start(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    name: Option<&str>,
    ref_id: Option<u32>,
) -> Result<(), PsrpError> {
    writer
        .write_event(Event::Start(element(tag, name, ref_id)))
        .map_err(|e| PsrpError::XmlWrite(e.to_string()))
}

fn write_end(writer: &mut Writer<Vec<u8>>, tag: &str) -> Result<(), PsrpError> {
    writer
        .write_event(Event::End(BytesEnd::new(tag.to_string())))
        .map_err(|e| PsrpError::XmlWrite(e.to_string()))
}

fn write_empty(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    name: Option<&str>,
) -> Result<(), PsrpError> {
    writer
        .write_event(Event::Empty(element(tag, name, None)))
        .map_err(|e| PsrpError::XmlWrite(e.to_string()))
}

fn write_text(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    name: Option<&str>,
    text: &str,
) -> Result<(), PsrpError> {
    write_start(writer, tag, name, None)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| PsrpError::XmlWrite(e.to_string()))?;
    write_end(writer, tag)
}
