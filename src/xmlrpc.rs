// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2023 Normation SAS

//! Minimal XML-RPC codec
//!
//! Responses are decoded into a small tree first, then interpreted. Values are
//! converted to `serde_json::Value` so typed records can be deserialized with
//! serde.

use std::{collections::BTreeMap, io::Cursor};

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    reader::Reader,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

/// Records sent to the server are built with serde
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => a.into(),
            serde_json::Value::Object(o) => {
                Value::Struct(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Int(i) => serde_json::Value::from(i),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::String(s) | Value::DateTime(s) | Value::Base64(s) => serde_json::Value::String(s),
            Value::Double(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Struct(s) => {
                serde_json::Value::Object(s.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Nil => serde_json::Value::Null,
        }
    }
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

impl Value {
    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new("value")))?;
        match self {
            Value::Int(i) => {
                let kind = if i32::try_from(*i).is_ok() { "int" } else { "i8" };
                write_text_element(writer, kind, &i.to_string())?
            }
            Value::Bool(b) => write_text_element(writer, "boolean", if *b { "1" } else { "0" })?,
            Value::String(s) => write_text_element(writer, "string", s)?,
            Value::Double(d) => write_text_element(writer, "double", &d.to_string())?,
            Value::DateTime(d) => write_text_element(writer, "dateTime.iso8601", d)?,
            Value::Base64(b) => write_text_element(writer, "base64", b)?,
            Value::Array(values) => {
                writer.write_event(Event::Start(BytesStart::new("array")))?;
                writer.write_event(Event::Start(BytesStart::new("data")))?;
                for v in values {
                    v.write(writer)?;
                }
                writer.write_event(Event::End(BytesEnd::new("data")))?;
                writer.write_event(Event::End(BytesEnd::new("array")))?;
            }
            Value::Struct(members) => {
                writer.write_event(Event::Start(BytesStart::new("struct")))?;
                for (name, v) in members {
                    writer.write_event(Event::Start(BytesStart::new("member")))?;
                    write_text_element(writer, "name", name)?;
                    v.write(writer)?;
                    writer.write_event(Event::End(BytesEnd::new("member")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("struct")))?;
            }
            Value::Nil => writer.write_event(Event::Empty(BytesStart::new("nil")))?,
        }
        writer.write_event(Event::End(BytesEnd::new("value")))?;
        Ok(())
    }
}

/// Serialize a method call
pub fn encode_call(method: &str, params: &[Value]) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    writer.write_event(Event::Start(BytesStart::new("methodCall")))?;
    write_text_element(&mut writer, "methodName", method)?;
    writer.write_event(Event::Start(BytesStart::new("params")))?;
    for p in params {
        writer.write_event(Event::Start(BytesStart::new("param")))?;
        p.write(&mut writer)?;
        writer.write_event(Event::End(BytesEnd::new("param")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("params")))?;
    writer.write_event(Event::End(BytesEnd::new("methodCall")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Result<&Node> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("Missing '{}' element in '{}'", name, self.name))
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

/// Read the whole document into a tree
///
/// Text is kept as-is, whitespace between elements is only ignored when the
/// element has children.
fn parse_tree(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Node> = vec![];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Node::new(e.name().as_ref())),
            Event::Empty(e) => {
                let node = Node::new(e.name().as_ref());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| anyhow!("Unbalanced XML-RPC document"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Eof => bail!("Unexpected end of XML-RPC document"),
            _ => (),
        }
    }
}

fn decode_value(node: &Node) -> Result<Value> {
    let Some(typed) = node.children.first() else {
        // untyped values are strings
        return Ok(Value::String(node.text.clone()));
    };
    Ok(match typed.name.as_str() {
        "i4" | "int" | "i8" => Value::Int(
            typed
                .text
                .trim()
                .parse()
                .with_context(|| format!("Invalid integer '{}'", typed.text))?,
        ),
        "boolean" => match typed.text.trim() {
            "1" => Value::Bool(true),
            "0" => Value::Bool(false),
            o => bail!("Invalid boolean '{}'", o),
        },
        "string" => Value::String(typed.text.clone()),
        "double" => Value::Double(
            typed
                .text
                .trim()
                .parse()
                .with_context(|| format!("Invalid double '{}'", typed.text))?,
        ),
        "dateTime.iso8601" => Value::DateTime(typed.text.trim().to_string()),
        "base64" => Value::Base64(typed.text.trim().to_string()),
        "nil" => Value::Nil,
        "array" => Value::Array(
            typed
                .child("data")?
                .children_named("value")
                .map(decode_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        "struct" => {
            let mut members = BTreeMap::new();
            for m in typed.children_named("member") {
                let name = m.child("name")?.text.clone();
                members.insert(name, decode_value(m.child("value")?)?);
            }
            Value::Struct(members)
        }
        t => bail!("Unsupported XML-RPC type '{}'", t),
    })
}

/// Decode a method response, faults become errors
pub fn decode_response(xml: &str) -> Result<Value> {
    let root = parse_tree(xml).context("Parsing XML-RPC response")?;
    if root.name != "methodResponse" {
        bail!("Expected a methodResponse document, got '{}'", root.name)
    }
    if let Ok(fault) = root.child("fault") {
        let (code, message) = match decode_value(fault.child("value")?)? {
            Value::Struct(mut s) => (
                s.remove("faultCode"),
                s.remove("faultString"),
            ),
            _ => (None, None),
        };
        let code = match code {
            Some(Value::Int(c)) => c.to_string(),
            _ => "unknown".to_string(),
        };
        let message = match message {
            Some(Value::String(m)) => m,
            _ => "no message".to_string(),
        };
        bail!("Server returned fault {}: {}", code, message)
    }
    decode_value(root.child("params")?.child("param")?.child("value")?)
}
