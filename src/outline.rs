//! Document outline (bookmarks): read the top-level titles, retitle the first
//! entry, or write a fresh flat outline.

use crate::compose::{catalog_id, resolve};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat, dictionary};
use std::collections::HashSet;

/// Decodes a PDF text string: UTF-16BE with a BOM, otherwise one byte per char.
pub fn decode_text(obj: &Object) -> Option<String> {
    let bytes = obj.as_str().ok()?;
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }
    Some(bytes.iter().map(|&b| b as char).collect())
}

pub fn encode_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn outline_root_id(doc: &Document, catalog: ObjectId) -> Option<ObjectId> {
    let catalog = doc.get_object(catalog).and_then(Object::as_dict).ok()?;
    catalog.get(b"Outlines").and_then(Object::as_reference).ok()
}

fn first_item_id(doc: &Document) -> Option<ObjectId> {
    top_level_items(doc, catalog_id(doc).ok()?).first().copied()
}

/// Ids of the top-level outline items reachable from `catalog`, in order.
pub fn top_level_items(doc: &Document, catalog: ObjectId) -> Vec<ObjectId> {
    let mut items = Vec::new();
    let Some(root) = outline_root_id(doc, catalog)
        .and_then(|id| doc.get_object(id).and_then(Object::as_dict).ok())
    else {
        return items;
    };
    let mut next = root.get(b"First").and_then(Object::as_reference).ok();
    while let Some(id) = next {
        if items.contains(&id) || items.len() >= 10_000 {
            break;
        }
        let Ok(item) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        items.push(id);
        next = item.get(b"Next").and_then(Object::as_reference).ok();
    }
    items
}

/// Titles of the top-level outline entries, in order.
pub fn outline_titles(doc: &Document) -> Vec<String> {
    let Ok(catalog) = catalog_id(doc) else {
        return Vec::new();
    };
    top_level_items(doc, catalog)
        .into_iter()
        .filter_map(|id| {
            let item = doc.get_object(id).and_then(Object::as_dict).ok()?;
            let title = item.get(b"Title").ok()?;
            decode_text(resolve(doc, title).ok()?)
        })
        .collect()
}

/// One page's contribution to a combined outline: the existing top-level
/// items to carry over, or a fresh entry when there are none.
#[derive(Debug, Clone)]
pub struct OutlinePart {
    pub items: Vec<ObjectId>,
    pub title: String,
    pub page_id: ObjectId,
}

/// Links the parts' top-level items, in order, under one new outline root
/// on the document catalog. Children of carried items keep their subtree.
pub fn chain_outlines(doc: &mut Document, parts: &[OutlinePart]) -> lopdf::Result<()> {
    let mut chain = Vec::new();
    for part in parts {
        if part.items.is_empty() {
            let id = doc.add_object(dictionary! {
                "Title" => encode_text(&part.title),
                "Dest" => vec![Object::Reference(part.page_id), "Fit".into()],
            });
            chain.push(id);
        } else {
            chain.extend(part.items.iter().copied());
        }
    }
    let catalog = catalog_id(doc)?;
    if chain.is_empty() {
        doc.get_object_mut(catalog)
            .and_then(Object::as_dict_mut)?
            .remove(b"Outlines");
        return Ok(());
    }

    let root_id = doc.new_object_id();
    for (idx, id) in chain.iter().enumerate() {
        let item = doc.get_object_mut(*id).and_then(Object::as_dict_mut)?;
        item.set("Parent", root_id);
        match idx.checked_sub(1).map(|prev| chain[prev]) {
            Some(prev) => item.set("Prev", prev),
            None => {
                item.remove(b"Prev");
            }
        }
        match chain.get(idx + 1) {
            Some(next) => item.set("Next", *next),
            None => {
                item.remove(b"Next");
            }
        }
    }
    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => chain[0],
            "Last" => chain[chain.len() - 1],
            "Count" => chain.len() as i64,
        }),
    );
    let catalog = doc.get_object_mut(catalog).and_then(Object::as_dict_mut)?;
    catalog.set("Outlines", root_id);
    catalog.set("PageMode", "UseOutlines");
    Ok(())
}

/// Every outline item below `root`, children included, parents first.
fn subtree_items(doc: &Document, root: ObjectId) -> Vec<ObjectId> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut parents = vec![root];
    while let Some(parent) = parents.pop() {
        let Ok(dict) = doc.get_object(parent).and_then(Object::as_dict) else {
            continue;
        };
        let mut next = dict.get(b"First").and_then(Object::as_reference).ok();
        while let Some(id) = next {
            if !seen.insert(id) || seen.len() > 10_000 {
                break;
            }
            let Ok(item) = doc.get_object(id).and_then(Object::as_dict) else {
                break;
            };
            items.push(id);
            parents.push(id);
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
    }
    items
}

fn retarget(dest: &mut Object, from: ObjectId, to: ObjectId) {
    if let Object::Array(parts) = dest {
        if let Some(first) = parts.first_mut() {
            if matches!(first, Object::Reference(id) if *id == from) {
                *first = Object::Reference(to);
            }
        }
    }
}

/// Hangs the outline of an imported catalog (`source_catalog`, already in
/// `doc`) under `doc`'s own catalog. Destinations on `old_page` now point at
/// `new_page`. Returns false when the source had no outline.
pub fn adopt_outline(
    doc: &mut Document,
    source_catalog: ObjectId,
    old_page: ObjectId,
    new_page: ObjectId,
) -> lopdf::Result<bool> {
    let Some(root) = outline_root_id(doc, source_catalog) else {
        return Ok(false);
    };
    if doc.get_object(root).and_then(Object::as_dict).is_err() {
        return Ok(false);
    }
    for id in subtree_items(doc, root) {
        let action_id = {
            let item = doc.get_object_mut(id).and_then(Object::as_dict_mut)?;
            if let Ok(dest) = item.get_mut(b"Dest") {
                retarget(dest, old_page, new_page);
            }
            match item.get_mut(b"A") {
                Ok(Object::Dictionary(action)) => {
                    if let Ok(dest) = action.get_mut(b"D") {
                        retarget(dest, old_page, new_page);
                    }
                    None
                }
                Ok(Object::Reference(action)) => Some(*action),
                _ => None,
            }
        };
        if let Some(action_id) = action_id {
            if let Ok(action) = doc.get_object_mut(action_id).and_then(Object::as_dict_mut) {
                if let Ok(dest) = action.get_mut(b"D") {
                    retarget(dest, old_page, new_page);
                }
            }
        }
    }
    let catalog = catalog_id(doc)?;
    let catalog = doc.get_object_mut(catalog).and_then(Object::as_dict_mut)?;
    catalog.set("Outlines", root);
    catalog.set("PageMode", "UseOutlines");
    Ok(true)
}

/// Renames the first top-level entry to `title`, or creates a one-entry
/// outline pointing at `page_id` when the document has none.
pub fn retitle_or_create(doc: &mut Document, title: &str, page_id: ObjectId) -> lopdf::Result<()> {
    if let Some(first) = first_item_id(doc) {
        let item = doc.get_object_mut(first).and_then(Object::as_dict_mut)?;
        item.set("Title", encode_text(title));
        return Ok(());
    }
    replace_outline(doc, &[(title.to_string(), page_id)])
}

/// Replaces the document outline with a flat list of entries.
pub fn replace_outline(doc: &mut Document, entries: &[(String, ObjectId)]) -> lopdf::Result<()> {
    let catalog = catalog_id(doc)?;
    if entries.is_empty() {
        doc.get_object_mut(catalog)
            .and_then(Object::as_dict_mut)?
            .remove(b"Outlines");
        return Ok(());
    }

    let root_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = entries.iter().map(|_| doc.new_object_id()).collect();
    for (idx, ((title, page_id), id)) in entries.iter().zip(&item_ids).enumerate() {
        let mut item = dictionary! {
            "Title" => encode_text(title),
            "Parent" => root_id,
            "Dest" => vec![Object::Reference(*page_id), "Fit".into()],
        };
        if idx > 0 {
            item.set("Prev", item_ids[idx - 1]);
        }
        if let Some(next) = item_ids.get(idx + 1) {
            item.set("Next", *next);
        }
        doc.objects.insert(*id, Object::Dictionary(item));
    }
    let root: Dictionary = dictionary! {
        "Type" => "Outlines",
        "First" => item_ids[0],
        "Last" => item_ids[item_ids.len() - 1],
        "Count" => item_ids.len() as i64,
    };
    doc.objects.insert(root_id, Object::Dictionary(root));

    let catalog = doc.get_object_mut(catalog).and_then(Object::as_dict_mut)?;
    catalog.set("Outlines", root_id);
    catalog.set("PageMode", "UseOutlines");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{blank_document, first_page_id};
    use crate::types::Size;
    use std::path::Path;

    #[test]
    fn missing_outline_is_synthesised() {
        let mut doc = blank_document(Size::letter());
        let page = first_page_id(&doc, Path::new("mem.pdf")).expect("page");
        assert!(outline_titles(&doc).is_empty());
        retitle_or_create(&mut doc, "Top", page).expect("outline");
        assert_eq!(outline_titles(&doc), vec!["Top".to_string()]);

        retitle_or_create(&mut doc, "Bottom", page).expect("retitle");
        assert_eq!(outline_titles(&doc), vec!["Bottom".to_string()]);
    }

    #[test]
    fn flat_outline_keeps_entry_order() {
        let mut doc = blank_document(Size::letter());
        let page = first_page_id(&doc, Path::new("mem.pdf")).expect("page");
        let entries = vec![
            ("Front".to_string(), page),
            ("Back".to_string(), page),
            ("Détail".to_string(), page),
        ];
        replace_outline(&mut doc, &entries).expect("outline");
        assert_eq!(outline_titles(&doc), vec!["Front", "Back", "Détail"]);
    }

    #[test]
    fn chained_outline_mixes_carried_and_fresh_entries() {
        let mut doc = blank_document(Size::letter());
        let page = first_page_id(&doc, Path::new("mem.pdf")).expect("page");
        replace_outline(&mut doc, &[("Top".to_string(), page), ("U1".to_string(), page)])
            .expect("outline");
        let catalog = catalog_id(&doc).expect("catalog");
        let carried = top_level_items(&doc, catalog);
        assert_eq!(carried.len(), 2);

        let parts = vec![
            OutlinePart {
                items: carried,
                title: "ignored".to_string(),
                page_id: page,
            },
            OutlinePart {
                items: Vec::new(),
                title: "Bottom".to_string(),
                page_id: page,
            },
        ];
        chain_outlines(&mut doc, &parts).expect("chain");
        assert_eq!(outline_titles(&doc), vec!["Top", "U1", "Bottom"]);
    }

    #[test]
    fn adopted_outline_keeps_children_and_follows_the_new_page() {
        let mut source = blank_document(Size::letter());
        let old_page = first_page_id(&source, Path::new("layer.pdf")).expect("page");
        replace_outline(&mut source, &[("demo".to_string(), old_page)]).expect("outline");
        let catalog = catalog_id(&source).expect("catalog");
        let parent = top_level_items(&source, catalog)[0];
        let child = source.add_object(dictionary! {
            "Title" => encode_text("R1"),
            "Parent" => parent,
            "A" => dictionary! {
                "S" => "GoTo",
                "D" => vec![Object::Reference(old_page), "XYZ".into(), 10.into(), 20.into(), Object::Null],
            },
        });
        let item = source
            .get_object_mut(parent)
            .and_then(Object::as_dict_mut)
            .expect("item");
        item.set("First", child);
        item.set("Last", child);
        item.set("Count", 1);

        let mut doc = blank_document(Size::letter());
        let new_page = first_page_id(&doc, Path::new("out.pdf")).expect("page");
        let (imported_pages, imported_catalog) = crate::compose::import_with_catalog(&mut doc, source);
        let imported_catalog = imported_catalog.expect("catalog");
        let imported_old_page = imported_pages[0];

        assert!(adopt_outline(&mut doc, imported_catalog, imported_old_page, new_page).expect("adopt"));
        retitle_or_create(&mut doc, "Top", new_page).expect("retitle");
        assert_eq!(outline_titles(&doc), vec!["Top".to_string()]);

        let top = top_level_items(&doc, catalog_id(&doc).expect("catalog"))[0];
        let top = doc.get_object(top).and_then(Object::as_dict).expect("top");
        let dest = top.get(b"Dest").and_then(Object::as_array).expect("dest");
        assert!(matches!(dest[0], Object::Reference(id) if id == new_page));
        let child = top
            .get(b"First")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_object(id))
            .and_then(Object::as_dict)
            .expect("child");
        assert_eq!(decode_text(child.get(b"Title").expect("title")).as_deref(), Some("R1"));
        let target = child
            .get(b"A")
            .and_then(Object::as_dict)
            .and_then(|a| a.get(b"D"))
            .and_then(Object::as_array)
            .expect("action dest");
        assert!(matches!(target[0], Object::Reference(id) if id == new_page));
    }

    #[test]
    fn source_without_outline_is_not_adopted() {
        let mut doc = blank_document(Size::letter());
        let page = first_page_id(&doc, Path::new("out.pdf")).expect("page");
        let (_, catalog) = crate::compose::import_with_catalog(&mut doc, blank_document(Size::letter()));
        let adopted = adopt_outline(&mut doc, catalog.expect("catalog"), page, page).expect("adopt");
        assert!(!adopted);
        assert!(outline_titles(&doc).is_empty());
    }

    #[test]
    fn non_ascii_titles_use_utf16() {
        let obj = encode_text("Bestückung");
        let bytes = obj.as_str().expect("string");
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text(&obj).as_deref(), Some("Bestückung"));
        assert_eq!(decode_text(&encode_text("plain")).as_deref(), Some("plain"));
    }
}
