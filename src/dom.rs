//! UI hierarchy parsing and element extraction.
//!
//! Works on `uiautomator dump` output. Every interactive node gets a stable
//! [`ElementId`] built from its resource attributes, so the same control maps
//! to the same id across rounds even though its on-screen number changes.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::TreeError;
use crate::types::{BBox, Capability, DenyList, Element, ElementId, ElementSet};

/// Content descriptions at least this long are left out of the id.
const MAX_DESC_IN_ID: usize = 20;

/// An interactive node as found in the dump, before any filtering.
#[derive(Debug, Clone)]
struct UiNode {
    id: ElementId,
    bbox: BBox,
    clickable: bool,
    focusable: bool,
}

/// Builds the per-round [`ElementSet`] from a hierarchy dump.
#[derive(Debug, Clone)]
pub struct TreeExtractor {
    min_dist: f64,
}

impl TreeExtractor {
    /// `min_dist` is the center distance (px) under which two nodes count as one widget.
    pub fn new(min_dist: f64) -> Self {
        Self { min_dist }
    }

    /// Read a dump from disk and extract the element set.
    pub fn extract(&self, snapshot: &Path, deny: &DenyList) -> Result<ElementSet, TreeError> {
        let xml = std::fs::read_to_string(snapshot).map_err(|source| TreeError::Read {
            path: snapshot.to_path_buf(),
            source,
        })?;
        self.extract_str(&xml, deny)
    }

    /// Clickables first (minus denied ids), then focusables that are neither
    /// denied nor sitting on top of an included clickable.
    pub fn extract_str(&self, xml: &str, deny: &DenyList) -> Result<ElementSet, TreeError> {
        let nodes = parse_nodes(xml)?;
        let clickables = self.collect(&nodes, Capability::Clickable);
        let focusables = self.collect(&nodes, Capability::Focusable);

        let mut elements: Vec<Element> = clickables
            .into_iter()
            .filter(|e| !deny.contains(&e.id))
            .collect();
        let clickable_centers: Vec<_> = elements.iter().map(Element::center).collect();

        for elem in focusables {
            if deny.contains(&elem.id) {
                continue;
            }
            let center = elem.center();
            let overlaps = clickable_centers
                .iter()
                .any(|c| c.distance(&center) <= self.min_dist);
            if !overlaps {
                elements.push(elem);
            }
        }

        debug!(
            count = elements.len(),
            denied = deny.len(),
            "extracted interactive elements"
        );
        Ok(ElementSet::new(elements))
    }

    /// Nodes carrying `capability`. Focusables whose center is within
    /// `min_dist` of an already collected focusable are dropped; clickables
    /// are all kept.
    fn collect(&self, nodes: &[UiNode], capability: Capability) -> Vec<Element> {
        let mut out: Vec<Element> = Vec::new();
        for node in nodes {
            let flagged = match capability {
                Capability::Clickable => node.clickable,
                Capability::Focusable => node.focusable,
            };
            if !flagged {
                continue;
            }
            let center = node.bbox.center();
            let close = capability == Capability::Focusable
                && out
                    .iter()
                    .any(|e| e.center().distance(&center) <= self.min_dist);
            if !close {
                out.push(Element {
                    id: node.id.clone(),
                    bbox: node.bbox,
                    capability,
                });
            }
        }
        out
    }
}

/// Walk the dump in document order, keeping a stack of ancestor base ids.
fn parse_nodes(xml: &str) -> Result<Vec<UiNode>, TreeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Option<String>> = Vec::new();
    let mut nodes = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let base = visit(&start, stack.last(), &mut nodes)?;
                stack.push(base);
            }
            Event::Empty(start) => {
                visit(&start, stack.last(), &mut nodes)?;
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(nodes)
}

/// Record the node if it is interactive; returns its base id for its children.
fn visit(
    start: &BytesStart<'_>,
    parent: Option<&Option<String>>,
    nodes: &mut Vec<UiNode>,
) -> Result<Option<String>, TreeError> {
    let attrs = attributes(start)?;
    let Some(bounds) = attrs.get("bounds") else {
        return Ok(None);
    };
    let bbox = parse_bounds(bounds)?;
    let base = base_id(&attrs, &bbox);

    let clickable = flag(&attrs, Capability::Clickable);
    let focusable = flag(&attrs, Capability::Focusable);
    if clickable || focusable {
        let mut id = match parent {
            Some(Some(prefix)) => format!("{prefix}_{base}"),
            _ => base.clone(),
        };
        if let Some(index) = attrs.get("index") {
            id.push('_');
            id.push_str(index);
        }
        nodes.push(UiNode {
            id: ElementId::new(id),
            bbox,
            clickable,
            focusable,
        });
    }

    Ok(Some(base))
}

fn attributes(start: &BytesStart<'_>) -> Result<HashMap<String, String>, TreeError> {
    let mut map = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| TreeError::Attribute(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn flag(attrs: &HashMap<String, String>, capability: Capability) -> bool {
    attrs
        .get(capability.attribute())
        .is_some_and(|v| v == "true")
}

/// `resource-id` (or `class_w_h` without one), plus a short content description.
fn base_id(attrs: &HashMap<String, String>, bbox: &BBox) -> String {
    let mut id = match attrs.get("resource-id").filter(|v| !v.is_empty()) {
        Some(rid) => rid.replace(':', ".").replace('/', "_"),
        None => {
            let class = attrs.get("class").map(String::as_str).unwrap_or("node");
            format!("{class}_{}_{}", bbox.width(), bbox.height())
        }
    };
    if let Some(desc) = attrs
        .get("content-desc")
        .filter(|d| !d.is_empty() && d.chars().count() < MAX_DESC_IN_ID)
    {
        let desc = desc.replace('/', "_").replace(' ', "").replace(':', "_");
        id.push('_');
        id.push_str(&desc);
    }
    id
}

/// Parse `[x1,y1][x2,y2]`.
pub fn parse_bounds(raw: &str) -> Result<BBox, TreeError> {
    let invalid = || TreeError::Bounds(raw.to_string());
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(invalid)?;
    let (first, second) = inner.split_once("][").ok_or_else(invalid)?;

    let point = |s: &str| -> Option<(i32, i32)> {
        let (x, y) = s.split_once(',')?;
        Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
    };
    let (x1, y1) = point(first).ok_or_else(invalid)?;
    let (x2, y2) = point(second).ok_or_else(invalid)?;
    Ok(BBox::new(x1, y1, x2, y2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(attrs: &str) -> String {
        format!(r#"<node index="0" class="android.widget.Button" {attrs} />"#)
    }

    fn dump(body: &str) -> String {
        format!(
            r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0"><node index="0" class="android.widget.FrameLayout" resource-id="" bounds="[0,0][1080,2400]" clickable="false" focusable="false">{body}</node></hierarchy>"#
        )
    }

    #[test]
    fn parses_bounds() {
        assert_eq!(
            parse_bounds("[10,20][110,220]").unwrap(),
            BBox::new(10, 20, 110, 220)
        );
        assert!(matches!(
            parse_bounds("10,20,110,220"),
            Err(TreeError::Bounds(_))
        ));
        assert!(parse_bounds("[a,b][1,2]").is_err());
    }

    #[test]
    fn focusable_twin_of_clickable_is_dropped() {
        let xml = dump(&[
            node(r#"resource-id="app:id/ok" bounds="[0,0][100,100]" clickable="true" focusable="false""#),
            node(r#"resource-id="app:id/cancel" bounds="[500,500][600,600]" clickable="true" focusable="false""#),
            node(r#"resource-id="app:id/ok_wrap" bounds="[5,0][105,100]" clickable="false" focusable="true""#),
        ]
        .concat());

        let set = TreeExtractor::new(20.0)
            .extract_str(&xml, &DenyList::new())
            .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|e| e.capability == Capability::Clickable));
    }

    #[test]
    fn distant_focusable_is_kept_after_clickables() {
        let xml = dump(&[
            node(r#"resource-id="app:id/field" bounds="[0,1000][1080,1100]" clickable="false" focusable="true""#),
            node(r#"resource-id="app:id/ok" bounds="[0,0][100,100]" clickable="true" focusable="false""#),
        ]
        .concat());

        let set = TreeExtractor::new(20.0)
            .extract_str(&xml, &DenyList::new())
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().capability, Capability::Clickable);
        assert_eq!(set.get(2).unwrap().capability, Capability::Focusable);
    }

    #[test]
    fn ids_are_stable_and_denylisted_ids_excluded() {
        let xml = dump(&[
            node(r#"resource-id="com.demo:id/send" bounds="[0,0][100,100]" clickable="true" focusable="false""#),
            node(r#"resource-id="" content-desc="More options" bounds="[900,0][1000,100]" clickable="true" focusable="false""#),
        ]
        .concat());

        let extractor = TreeExtractor::new(20.0);
        let first = extractor.extract_str(&xml, &DenyList::new()).unwrap();
        let ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "android.widget.FrameLayout_1080_2400_com.demo.id_send_0",
                "android.widget.FrameLayout_1080_2400_android.widget.Button_100_100_Moreoptions_0",
            ]
        );

        let mut deny = DenyList::new();
        deny.insert(first.get(1).unwrap().id.clone());
        let second = extractor.extract_str(&xml, &deny).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.get(1).unwrap().id, first.get(2).unwrap().id);
    }

    #[test]
    fn neighbouring_clickables_are_all_kept() {
        let xml = dump(&[
            node(r#"resource-id="app:id/a" bounds="[0,0][40,40]" clickable="true" focusable="false""#),
            node(r#"resource-id="app:id/b" bounds="[25,0][65,40]" clickable="true" focusable="false""#),
        ]
        .concat());
        let set = TreeExtractor::new(30.0)
            .extract_str(&xml, &DenyList::new())
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn neighbouring_focusables_collapse() {
        let xml = dump(&[
            node(r#"resource-id="app:id/a" bounds="[0,500][100,600]" clickable="false" focusable="true""#),
            node(r#"resource-id="app:id/b" bounds="[2,502][102,602]" clickable="false" focusable="true""#),
        ]
        .concat());
        let set = TreeExtractor::new(20.0)
            .extract_str(&xml, &DenyList::new())
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(1).unwrap().capability, Capability::Focusable);
    }

    /// No included focusable may sit within the threshold of an included
    /// clickable, whatever the layout.
    #[test]
    fn focusables_never_overlap_included_clickables() {
        let min_dist = 30.0;
        let extractor = TreeExtractor::new(min_dist);
        for seed in 0u32..40 {
            let mut body = String::new();
            for i in 0..12u32 {
                // Deterministic scatter over a small area, so centers often collide.
                let x = ((seed * 37 + i * 53) % 200) as i32;
                let y = ((seed * 91 + i * 29) % 200) as i32;
                let (clickable, focusable) = match (seed + i) % 3 {
                    0 => ("true", "false"),
                    1 => ("false", "true"),
                    _ => ("true", "true"),
                };
                body.push_str(&node(&format!(
                    r#"resource-id="app:id/n{i}" bounds="[{x},{y}][{},{}]" clickable="{clickable}" focusable="{focusable}""#,
                    x + 40,
                    y + 40
                )));
            }
            let mut deny = DenyList::new();
            if seed % 4 == 0 {
                deny.insert(ElementId::from("android.widget.FrameLayout_1080_2400_app.id_n0_0"));
            }
            let set = extractor.extract_str(&dump(&body), &deny).unwrap();

            let clickables: Vec<_> = set
                .iter()
                .filter(|e| e.capability == Capability::Clickable)
                .collect();
            for focusable in set.iter().filter(|e| e.capability == Capability::Focusable) {
                for clickable in &clickables {
                    assert!(
                        clickable.center().distance(&focusable.center()) > min_dist,
                        "layout {seed}: {} overlaps {}",
                        focusable.id,
                        clickable.id
                    );
                }
            }
            assert!(set.iter().all(|e| !deny.contains(&e.id)));
        }
    }

    #[test]
    fn malformed_dump_is_an_error_not_an_empty_set() {
        let extractor = TreeExtractor::new(20.0);
        assert!(
            extractor
                .extract_str("<hierarchy><node></hierarchy>", &DenyList::new())
                .is_err()
        );
        let bad_bounds = dump(&node(r#"bounds="[0,0]" clickable="true""#));
        assert!(matches!(
            extractor.extract_str(&bad_bounds, &DenyList::new()),
            Err(TreeError::Bounds(_))
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = TreeExtractor::new(20.0)
            .extract(Path::new("/nonexistent/dump.xml"), &DenyList::new())
            .unwrap_err();
        assert!(matches!(err, TreeError::Read { .. }));
    }
}
