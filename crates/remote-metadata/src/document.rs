// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsed SAML metadata documents.
//!
//! The service treats metadata as an opaque value; parsing only validates that
//! the payload is a well-formed `EntitiesDescriptor` or `EntityDescriptor` and
//! extracts a structural summary. The raw bytes are kept alongside so
//! consumers can hand them to a full SAML library.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Serialize;

use crate::error::ParseError;

/// Kind of the document's root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RootKind {
    EntitiesDescriptor,
    EntityDescriptor,
}

/// Summary of a single `EntityDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub entity_id: String,
    /// Whether the entity carries an `IDPSSODescriptor`.
    pub idp: bool,
    /// Whether the entity carries an `SPSSODescriptor`.
    pub sp: bool,
}

/// A parsed metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataDocument {
    root: RootKind,
    name: Option<String>,
    valid_until: Option<String>,
    entities: Vec<EntitySummary>,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl MetadataDocument {
    /// Parses raw metadata bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let xml = std::str::from_utf8(bytes)?;
        let mut reader = Reader::from_str(xml);

        let mut root: Option<RootKind> = None;
        let mut name = None;
        let mut valid_until = None;
        let mut entities: Vec<EntitySummary> = Vec::new();
        // Depth at which the entity currently being read was opened.
        let mut entity_depth: Option<usize> = None;
        let mut depth = 0usize;

        loop {
            let (element, is_empty) = match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if entity_depth == Some(depth) {
                        entity_depth = None;
                    }
                    continue;
                }
                _ => continue,
            };

            let local = local_name(&element);
            if depth == 0 {
                if root.is_some() {
                    return Err(ParseError::UnexpectedRoot(local));
                }
                let kind = match local.as_str() {
                    "EntitiesDescriptor" => RootKind::EntitiesDescriptor,
                    "EntityDescriptor" => RootKind::EntityDescriptor,
                    _ => return Err(ParseError::UnexpectedRoot(local)),
                };
                root = Some(kind);
                name = attribute(&element, "Name");
                valid_until = attribute(&element, "validUntil");
            }

            match local.as_str() {
                "EntityDescriptor" => {
                    let entity_id =
                        attribute(&element, "entityID").ok_or(ParseError::MissingEntityId)?;
                    entities.push(EntitySummary {
                        entity_id,
                        idp: false,
                        sp: false,
                    });
                    if !is_empty {
                        entity_depth = Some(depth);
                    }
                }
                "IDPSSODescriptor" if entity_depth.is_some() => {
                    if let Some(entity) = entities.last_mut() {
                        entity.idp = true;
                    }
                }
                "SPSSODescriptor" if entity_depth.is_some() => {
                    if let Some(entity) = entities.last_mut() {
                        entity.sp = true;
                    }
                }
                _ => {}
            }

            if !is_empty {
                depth += 1;
            }
        }

        if depth != 0 {
            return Err(ParseError::Unbalanced(depth));
        }
        let root = root.ok_or(ParseError::Empty)?;

        Ok(Self {
            root,
            name,
            valid_until,
            entities,
            raw: bytes.to_vec(),
        })
    }

    pub fn root(&self) -> RootKind {
        self.root
    }

    /// Federation name advertised on the root element, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Raw `validUntil` attribute of the root element, if any.
    pub fn valid_until(&self) -> Option<&str> {
        self.valid_until.as_deref()
    }

    pub fn entities(&self) -> &[EntitySummary] {
        &self.entities
    }

    /// Looks up an entity by its `entityID`.
    pub fn entity(&self, entity_id: &str) -> Option<&EntitySummary> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }

    /// Original serialized form of the document.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        let key = String::from_utf8_lossy(a.key.local_name().as_ref()).to_string();
        if key == name {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}
