use remb_api::PatchOp;
use remb_core::{RembError, RembResult};
use remb_store::{LocalNote, NewNote, Store, USER_KEY_PREFIX};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Key namespace of review items in the remote patch stream.
pub const ITEM_KEY_PREFIX: &str = "Item/";

/// Counts reported by one `apply` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSummary {
    pub users_put: usize,
    pub users_deleted: usize,
    pub notes_created: usize,
    pub notes_updated: usize,
    pub notes_deleted: usize,
}

/// Applies one ordered patch to the local store.
///
/// Operations are routed by key namespace. `User/` records are applied in
/// patch order; `Item/` operations are collected into create, update and
/// delete sets during the scan and committed together at the end, so a patch
/// that fails to decode never mutates any note. Keys outside both namespaces
/// are ignored.
#[derive(Debug)]
pub struct Reconciler<'a> {
    store: &'a Store,
    site_url: String,
    slot_limit: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a Store, site_url: &str, slot_limit: usize) -> Self {
        Self {
            store,
            site_url: site_url.trim_end_matches('/').to_string(),
            slot_limit,
        }
    }

    pub fn apply(&self, patch: &[PatchOp]) -> RembResult<PatchSummary> {
        let existing = self.store.note_guid_index()?;

        let mut summary = PatchSummary::default();
        let mut to_create: Vec<NewNote> = Vec::new();
        let mut to_update: Vec<LocalNote> = Vec::new();
        let mut to_delete: BTreeSet<String> = BTreeSet::new();

        for (ix, op) in patch.iter().enumerate() {
            match op {
                PatchOp::Clear => {
                    if ix != 0 {
                        return Err(RembError::pull(format!(
                            "unexpected 'clear' operation at index {ix}"
                        )));
                    }
                    self.store.clear_users()?;
                    to_delete.extend(existing.keys().cloned());
                }
                PatchOp::Del { key } => {
                    if let Some(guid) = key.strip_prefix(ITEM_KEY_PREFIX) {
                        to_delete.insert(guid.to_string());
                    } else if key.starts_with(USER_KEY_PREFIX) {
                        self.store.delete_user(key)?;
                        summary.users_deleted += 1;
                    }
                }
                PatchOp::Put { key, value } => {
                    if let Some(guid) = key.strip_prefix(ITEM_KEY_PREFIX) {
                        match existing.get(guid) {
                            None => to_create.push(self.new_note(value)?),
                            Some(&id) => to_update.push(self.updated_note(key, id, value)?),
                        }
                    } else if key.starts_with(USER_KEY_PREFIX) {
                        self.store.put_user(key, value)?;
                        summary.users_put += 1;
                    }
                }
            }
        }

        // An id that is created or updated by this patch survives any clear
        // or del that marked it, regardless of operation order.
        for note in &to_create {
            to_delete.remove(&note.guid);
        }
        for note in &to_update {
            to_delete.remove(&note.guid);
        }

        let delete_ids: Vec<i64> = to_delete
            .iter()
            .filter_map(|guid| existing.get(guid).copied())
            .collect();

        self.store.add_notes(&to_create)?;
        self.store.update_notes(&to_update)?;
        self.store.remove_notes(&delete_ids)?;

        summary.notes_created = to_create.len();
        summary.notes_updated = to_update.len();
        summary.notes_deleted = delete_ids.len();
        Ok(summary)
    }

    fn new_note(&self, value: &Map<String, Value>) -> RembResult<NewNote> {
        let item = self.decode_item(value)?;
        let slots = assign_slots(&[], &item.tokens, self.slot_limit)?;

        Ok(NewNote {
            guid: item.guid,
            link: item.link,
            note_text: item.note_text,
            content: item.content,
            slots,
        })
    }

    fn updated_note(
        &self,
        key: &str,
        id: i64,
        value: &Map<String, Value>,
    ) -> RembResult<LocalNote> {
        let item = self.decode_item(value)?;
        let Some(current) = self.store.get_note(id)? else {
            return Err(RembError::store(format!(
                "note {id} vanished while the patch was being applied"
            )));
        };
        if current.guid != item.guid {
            return Err(RembError::content(format!(
                "item key '{key}' does not match its payload id '{}'",
                item.guid
            )));
        }

        let slots = assign_slots(&current.slots, &item.tokens, self.slot_limit)?;

        Ok(LocalNote {
            id: current.id,
            guid: current.guid,
            link: item.link,
            note_text: item.note_text,
            content: item.content,
            slots,
        })
    }

    fn decode_item(&self, value: &Map<String, Value>) -> RembResult<DecodedItem> {
        let Some(id) = value.get("id").and_then(Value::as_str) else {
            return Err(content_shape("expected item 'id' to be a string"));
        };
        let Some(content) = value.get("content").and_then(Value::as_object) else {
            return Err(content_shape("expected 'content' to be an object"));
        };

        let tokens = card_tokens(content)?;
        let note_text = plain_text(content)?;

        Ok(DecodedItem {
            guid: id.to_string(),
            link: format!("{}/r/{id}", self.site_url),
            note_text,
            content: Value::Object(content.clone()),
            tokens,
        })
    }
}

struct DecodedItem {
    guid: String,
    link: String,
    note_text: String,
    content: Value,
    tokens: Vec<String>,
}

/// Derives the card tokens named by an item's crops. A "qa" crop contributes
/// one default card; an "occlusion-text" crop contributes one card per
/// occlusion. An unknown crop type means the content is newer than this
/// client, and guessing a token set would detach its review state.
fn card_tokens(content: &Map<String, Value>) -> RembResult<Vec<String>> {
    let Some(crops) = content.get("crops").and_then(Value::as_array) else {
        return Err(content_shape("expected 'crops' to be an array"));
    };

    let mut tokens = Vec::new();
    for crop in crops {
        let Some(crop_id) = crop.get("id").and_then(Value::as_str) else {
            return Err(content_shape("expected crop 'id' to be a string"));
        };
        let Some(crop_type) = crop.get("type").and_then(Value::as_str) else {
            return Err(content_shape("expected crop 'type' to be a string"));
        };

        match crop_type {
            "qa" => tokens.push(format!("{crop_id}-default")),
            "occlusion-text" => {
                let Some(occlusions) = crop.get("occlusions").and_then(Value::as_array) else {
                    return Err(content_shape("expected 'occlusions' to be an array"));
                };
                for occlusion in occlusions {
                    let Some(occlusion_id) = occlusion.get("id").and_then(Value::as_str) else {
                        return Err(content_shape("expected occlusion 'id' to be a string"));
                    };
                    tokens.push(format!("{crop_id}-{occlusion_id}"));
                }
            }
            other => {
                return Err(content_shape(&format!("unexpected crop type '{other}'")));
            }
        }
    }

    Ok(tokens)
}

fn plain_text(content: &Map<String, Value>) -> RembResult<String> {
    let text = content
        .get("note")
        .and_then(|note| note.get("text"))
        .and_then(|text| text.get("textPlain"))
        .and_then(Value::as_str);
    let Some(text) = text else {
        return Err(content_shape("'textPlain' not found"));
    };
    Ok(text.to_string())
}

/// Assigns a slot to every card token, preserving the slot of any token the
/// note already holds. New tokens are placed above the high-water mark in
/// token order; a slot freed by a removed token is never reused, since the
/// review history attached to it would resurface under an unrelated card.
fn assign_slots(existing: &[String], tokens: &[String], limit: usize) -> RembResult<Vec<String>> {
    let mut previous: BTreeMap<&str, usize> = BTreeMap::new();
    // One past the high-water mark. A token occupying two slots keeps the
    // first; the later slot counts as neither occupied nor reusable.
    let mut next = 0usize;

    for (slot, token) in existing.iter().enumerate() {
        if token.is_empty() || previous.contains_key(token.as_str()) {
            continue;
        }
        previous.insert(token, slot);
        next = slot + 1;
    }

    let mut assigned: BTreeMap<&str, usize> = BTreeMap::new();
    for token in tokens {
        if let Some(&slot) = previous.get(token.as_str()) {
            assigned.insert(token, slot);
        }
    }

    for token in tokens {
        if assigned.contains_key(token.as_str()) {
            continue;
        }
        if next >= limit {
            return Err(RembError::capacity(format!(
                "cannot assign card slot {next} (the limit is {limit}); this item has used too many card slots over its lifetime"
            )));
        }
        assigned.insert(token, next);
        next += 1;
    }

    let mut slots = vec![String::new(); limit];
    for (token, slot) in assigned {
        let Some(cell) = slots.get_mut(slot) else {
            return Err(RembError::capacity(format!(
                "card token '{token}' occupies slot {slot}, outside the configured limit of {limit}"
            )));
        };
        *cell = token.to_string();
    }

    Ok(slots)
}

fn content_shape(detail: &str) -> RembError {
    RembError::content(format!("invalid item content: {detail}"))
}
