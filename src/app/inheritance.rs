use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{ApiError, Backend, CrawlerPatch};
use crate::model::{FieldInfo, GroupInfo};

/// Selection state for the metadata fields a crawler inherits from its
/// source item. Partial updates from child views are merged into the map,
/// never replacing it wholesale.
pub struct InheritanceSelector {
    backend: Arc<dyn Backend>,
    crawler_id: i64,
    fields: Vec<FieldInfo>,
    groups: Vec<GroupInfo>,
    selection: HashMap<String, bool>,
}

impl InheritanceSelector {
    /// Fetch the field catalog for the source item and seed the selection
    /// with the fields the crawler already inherits.
    pub async fn open(
        backend: Arc<dyn Backend>,
        crawler_id: i64,
        source_guid: &str,
        preselected: &[String],
    ) -> Result<Self, ApiError> {
        let catalog = backend.inheritable_fields(source_guid).await?;
        let selection = preselected
            .iter()
            .map(|id| (id.clone(), true))
            .collect();

        Ok(Self {
            backend,
            crawler_id,
            fields: catalog.fields,
            groups: catalog.groups,
            selection,
        })
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    pub fn is_selected(&self, field_id: &str) -> bool {
        self.selection.get(field_id).copied().unwrap_or(false)
    }

    /// Merge a partial update; keys not present in `partial` keep their
    /// current value.
    pub fn merge(&mut self, partial: HashMap<String, bool>) {
        self.selection.extend(partial);
    }

    pub fn set(&mut self, field_id: &str, selected: bool) {
        self.selection.insert(field_id.to_string(), selected);
    }

    /// Check every recommended field that has a value to inherit. Nothing is
    /// ever unchecked here.
    pub fn select_all_recommended(&mut self) {
        for field in &self.fields {
            if field.recommended && !field.is_missing() {
                self.selection.insert(field.id.clone(), true);
            }
        }
    }

    /// Ids currently checked, in stable order.
    pub fn selected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .selection
            .iter()
            .filter(|(_, selected)| **selected)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// PATCH the checked ids onto the crawler. The local selection is left
    /// untouched; the next view reads the server's state.
    pub async fn save(&self) -> Result<(), ApiError> {
        self.backend
            .update_crawler(
                self.crawler_id,
                &CrawlerPatch {
                    inherited_fields: Some(self.selected_ids()),
                    ..CrawlerPatch::default()
                },
            )
            .await?;
        Ok(())
    }
}
