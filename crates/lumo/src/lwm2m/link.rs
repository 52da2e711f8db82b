// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CoRE link format, as carried by registration payloads.
//!
//! `</0/0>,</1/0>,</6>`: one link per object instance, or a bare object link
//! for an object supported without instances. Link attributes (`;rt=...`)
//! are accepted and ignored.

use crate::codec::CodecError;
use crate::message::ResourcePath;
use std::collections::BTreeMap;

/// Render paths as a link-format document.
pub fn format_links<'a, I>(paths: I) -> String
where
    I: IntoIterator<Item = &'a ResourcePath>,
{
    paths
        .into_iter()
        .map(|p| format!("<{}>", p))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a link-format document.
pub fn parse_links(document: &str) -> Result<Vec<ResourcePath>, CodecError> {
    let document = document.trim();
    if document.is_empty() {
        return Ok(Vec::new());
    }

    document
        .split(',')
        .map(|link| {
            let target = link.trim().split(';').next().unwrap_or_default();
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(ResourcePath::parse)
                .ok_or_else(|| CodecError::Text(format!("malformed link {:?}", link)))
        })
        .collect()
}

/// Object ids advertised by a link set, each with its instance ids.
///
/// Links that are not numeric object paths (`</rd>`, `</a/light>`) are skipped.
pub fn objects_from_links(links: &[ResourcePath]) -> BTreeMap<u16, Vec<u16>> {
    let mut objects: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
    for ids in links.iter().filter_map(ResourcePath::numeric) {
        match ids.as_slice() {
            [object] => {
                objects.entry(*object).or_default();
            }
            [object, instance, ..] => {
                let instances = objects.entry(*object).or_default();
                if !instances.contains(instance) {
                    instances.push(*instance);
                }
            }
            [] => {}
        }
    }
    objects
}
