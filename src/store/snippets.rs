// clipkeeper - Snippet Store
// Named snippets grouped into explicitly created folders

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Snippet, SnippetFolder};

/// Partial update for a snippet; `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnippetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Result of merging imported folders into the store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Imported {
    /// Folders added, in payload order
    pub folders: Vec<String>,
    pub snippets: usize,
    /// Payload folders skipped because the name is already taken
    pub conflicts: Vec<String>,
}

/// Folder-organized snippets in user-defined order.
#[derive(Debug, Default)]
pub struct SnippetStore {
    folders: Vec<SnippetFolder>,
    dirty: bool,
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid("folder name cannot be empty".to_string()));
    }
    Ok(())
}

impl SnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted folders. Later folders reusing a name are dropped.
    pub fn from_folders(folders: Vec<SnippetFolder>) -> Self {
        let mut store = Self::new();
        for folder in folders {
            if store.folder(&folder.name).is_some() {
                tracing::warn!(folder = %folder.name, "dropping duplicate snippet folder");
                continue;
            }
            store.folders.push(folder);
        }
        store
    }

    pub fn folders(&self) -> &[SnippetFolder] {
        &self.folders
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.folders.iter().map(|f| f.name.clone()).collect()
    }

    pub fn folder(&self, name: &str) -> Option<&SnippetFolder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn snippet_count(&self) -> usize {
        self.folders.iter().map(|f| f.snippets.len()).sum()
    }

    pub fn create_folder(&mut self, name: &str) -> Result<&SnippetFolder, StoreError> {
        validate_name(name)?;
        if self.folder(name).is_some() {
            return Err(StoreError::FolderExists(name.to_string()));
        }
        self.folders.push(SnippetFolder::new(name));
        self.dirty = true;
        Ok(&self.folders[self.folders.len() - 1])
    }

    pub fn rename_folder(&mut self, name: &str, new_name: &str) -> Result<(), StoreError> {
        validate_name(new_name)?;
        if name == new_name {
            return Err(StoreError::Invalid(format!(
                "folder is already named '{new_name}'"
            )));
        }
        let index = self.index_of(name)?;
        if self.folder(new_name).is_some() {
            return Err(StoreError::FolderExists(new_name.to_string()));
        }
        let folder = &mut self.folders[index];
        folder.name = new_name.to_string();
        folder.modified_at = Utc::now();
        self.dirty = true;
        Ok(())
    }

    /// Remove a folder and every snippet in it.
    pub fn delete_folder(&mut self, name: &str) -> Result<SnippetFolder, StoreError> {
        let index = self.index_of(name)?;
        self.dirty = true;
        Ok(self.folders.remove(index))
    }

    /// Add a snippet to an existing folder. Folders are never created implicitly.
    pub fn add_snippet(
        &mut self,
        folder: &str,
        content: &str,
        name: &str,
        tags: Vec<String>,
    ) -> Result<Snippet, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("content cannot be empty".to_string()));
        }
        let index = self.index_of(folder)?;
        let snippet = Snippet::new(content, name, tags);
        let folder = &mut self.folders[index];
        folder.snippets.push(snippet.clone());
        folder.modified_at = Utc::now();
        self.dirty = true;
        Ok(snippet)
    }

    pub fn update_snippet(
        &mut self,
        folder: &str,
        id: &str,
        patch: SnippetPatch,
    ) -> Result<Snippet, StoreError> {
        if patch.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(StoreError::Invalid("content cannot be empty".to_string()));
        }
        let (folder_index, snippet_index) = self.locate(folder, id)?;
        let now = Utc::now();
        let folder = &mut self.folders[folder_index];
        let snippet = &mut folder.snippets[snippet_index];
        if let Some(content) = patch.content {
            snippet.set_content(content);
        }
        if let Some(name) = patch.name {
            snippet.name = name;
        }
        if let Some(tags) = patch.tags {
            snippet.tags = tags;
        }
        snippet.modified_at = now;
        folder.modified_at = now;
        self.dirty = true;
        Ok(folder.snippets[snippet_index].clone())
    }

    pub fn delete_snippet(&mut self, folder: &str, id: &str) -> Result<Snippet, StoreError> {
        let (folder_index, snippet_index) = self.locate(folder, id)?;
        let folder = &mut self.folders[folder_index];
        folder.modified_at = Utc::now();
        self.dirty = true;
        Ok(folder.snippets.remove(snippet_index))
    }

    /// Move a snippet to the end of another folder.
    pub fn move_snippet(&mut self, id: &str, from: &str, to: &str) -> Result<Snippet, StoreError> {
        let (from_index, snippet_index) = self.locate(from, id)?;
        let to_index = self.index_of(to)?;
        if from_index == to_index {
            return Ok(self.folders[from_index].snippets[snippet_index].clone());
        }
        let now = Utc::now();
        let snippet = self.folders[from_index].snippets.remove(snippet_index);
        self.folders[from_index].modified_at = now;
        self.folders[to_index].snippets.push(snippet.clone());
        self.folders[to_index].modified_at = now;
        self.dirty = true;
        Ok(snippet)
    }

    /// Case-insensitive search over snippet content and names
    pub fn search(&self, query: &str) -> Vec<Snippet> {
        let needle = query.to_lowercase();
        self.folders
            .iter()
            .flat_map(|f| f.snippets.iter())
            .filter(|s| {
                s.content.to_lowercase().contains(&needle) || s.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Copy of every folder for export
    pub fn export(&self) -> Vec<SnippetFolder> {
        self.folders.clone()
    }

    /// Merge exported folders into the store.
    ///
    /// The payload is validated as a whole first; an invalid payload changes
    /// nothing. Folders whose name already exists are left untouched and
    /// reported as conflicts.
    pub fn import(&mut self, folders: Vec<SnippetFolder>) -> Result<Imported, StoreError> {
        for (i, folder) in folders.iter().enumerate() {
            validate_name(&folder.name)?;
            if folders[..i].iter().any(|f| f.name == folder.name) {
                return Err(StoreError::Invalid(format!(
                    "folder '{}' appears more than once",
                    folder.name
                )));
            }
            if let Some(snippet) = folder.snippets.iter().find(|s| s.content.trim().is_empty()) {
                return Err(StoreError::Invalid(format!(
                    "snippet '{}' in folder '{}' has no content",
                    snippet.id, folder.name
                )));
            }
        }

        let mut imported = Imported::default();
        for mut folder in folders {
            if self.folder(&folder.name).is_some() {
                imported.conflicts.push(folder.name);
                continue;
            }
            for snippet in &mut folder.snippets {
                let content = std::mem::take(&mut snippet.content);
                snippet.set_content(content);
            }
            imported.snippets += folder.snippets.len();
            imported.folders.push(folder.name.clone());
            self.folders.push(folder);
        }
        if !imported.folders.is_empty() {
            self.dirty = true;
        }
        Ok(imported)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn index_of(&self, name: &str) -> Result<usize, StoreError> {
        self.folders
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| StoreError::folder_not_found(name))
    }

    fn locate(&self, folder: &str, id: &str) -> Result<(usize, usize), StoreError> {
        let folder_index = self.index_of(folder)?;
        let snippet_index = self.folders[folder_index]
            .snippets
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::snippet_not_found(id))?;
        Ok((folder_index, snippet_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(folders: &[&str]) -> SnippetStore {
        let mut store = SnippetStore::new();
        for name in folders {
            store.create_folder(name).unwrap();
        }
        store.mark_clean();
        store
    }

    #[test]
    fn create_folder_twice_is_a_conflict() {
        let mut store = SnippetStore::new();
        store.create_folder("Work").unwrap();
        let err = store.create_folder("Work").unwrap_err();

        assert_eq!(err, StoreError::FolderExists("Work".to_string()));
        assert_eq!(store.folder_names(), vec!["Work"]);
    }

    #[test]
    fn folder_names_are_case_sensitive() {
        let mut store = SnippetStore::new();
        store.create_folder("work").unwrap();
        store.create_folder("Work").unwrap();
        assert_eq!(store.folders().len(), 2);
    }

    #[test]
    fn blank_folder_names_are_rejected() {
        let mut store = SnippetStore::new();
        assert!(matches!(store.create_folder("   "), Err(StoreError::Invalid(_))));
        store.create_folder("Valid").unwrap();
        assert!(matches!(store.rename_folder("Valid", ""), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn empty_folder_persists() {
        let store = store_with(&["Empty"]);
        assert!(store.folder("Empty").unwrap().snippets.is_empty());
    }

    #[test]
    fn add_snippet_requires_existing_folder() {
        let mut store = SnippetStore::new();
        let err = store.add_snippet("Typo", "content", "name", vec![]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "folder", .. }));
        assert!(store.folders().is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn add_snippet_appends_in_order() {
        let mut store = store_with(&["Work"]);
        store.add_snippet("Work", "one", "first", vec![]).unwrap();
        store
            .add_snippet("Work", "two", "second", vec!["tag".into()])
            .unwrap();

        let names: Vec<_> = store.folder("Work").unwrap().snippets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(store.is_dirty());
    }

    #[test]
    fn rename_folder_keeps_snippets() {
        let mut store = store_with(&["sink folder"]);
        store.add_snippet("sink folder", "x", "x", vec![]).unwrap();
        store.rename_folder("sink folder", "renamed folder").unwrap();

        assert!(store.folder("sink folder").is_none());
        assert_eq!(store.folder("renamed folder").unwrap().snippets.len(), 1);
    }

    #[test]
    fn rename_folder_errors() {
        let mut store = store_with(&["A", "B"]);
        assert!(matches!(store.rename_folder("missing", "C"), Err(StoreError::NotFound { .. })));
        assert_eq!(store.rename_folder("A", "B"), Err(StoreError::FolderExists("B".into())));
        assert!(matches!(store.rename_folder("A", "A"), Err(StoreError::Invalid(_))));
        assert!(!store.is_dirty());
    }

    #[test]
    fn delete_folder_cascades() {
        let mut store = store_with(&["Doomed", "Kept"]);
        store.add_snippet("Doomed", "a", "a", vec![]).unwrap();
        store.add_snippet("Kept", "b", "b", vec![]).unwrap();

        let removed = store.delete_folder("Doomed").unwrap();
        assert_eq!(removed.snippets.len(), 1);
        assert_eq!(store.snippet_count(), 1);
        assert!(store.delete_folder("Doomed").is_err());
    }

    #[test]
    fn update_is_partial() {
        let mut store = store_with(&["Work"]);
        let snippet = store
            .add_snippet("Work", "old", "Name", vec!["keep".into()])
            .unwrap();

        let updated = store
            .update_snippet(
                "Work",
                &snippet.id,
                SnippetPatch {
                    content: Some("new".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.content, "new");
        assert_eq!(updated.name, "Name");
        assert_eq!(updated.tags, vec!["keep".to_string()]);
        assert_eq!(updated.id, snippet.id);
    }

    #[test]
    fn update_unknown_snippet() {
        let mut store = store_with(&["Work"]);
        let err = store
            .update_snippet("Work", "nope", SnippetPatch::default())
            .unwrap_err();
        assert_eq!(err, StoreError::snippet_not_found("nope"));
    }

    #[test]
    fn move_snippet_between_folders() {
        let mut store = store_with(&["Source", "Dest"]);
        let snippet = store.add_snippet("Source", "move me", "m", vec![]).unwrap();

        store.move_snippet(&snippet.id, "Source", "Dest").unwrap();
        assert!(store.folder("Source").unwrap().snippets.is_empty());
        assert_eq!(store.folder("Dest").unwrap().snippets[0].id, snippet.id);
    }

    #[test]
    fn move_to_missing_folder_leaves_snippet_in_place() {
        let mut store = store_with(&["Source"]);
        let snippet = store.add_snippet("Source", "stay", "s", vec![]).unwrap();

        assert!(store.move_snippet(&snippet.id, "Source", "Nowhere").is_err());
        assert_eq!(store.folder("Source").unwrap().snippets.len(), 1);
    }

    #[test]
    fn delete_snippet() {
        let mut store = store_with(&["Work"]);
        let snippet = store.add_snippet("Work", "bye", "b", vec![]).unwrap();
        store.delete_snippet("Work", &snippet.id).unwrap();
        assert!(store.delete_snippet("Work", &snippet.id).is_err());
    }

    #[test]
    fn search_matches_name_or_content() {
        let mut store = store_with(&["Work"]);
        store.add_snippet("Work", "SELECT * FROM users", "query", vec![]).unwrap();
        store.add_snippet("Work", "hello", "Users greeting", vec![]).unwrap();
        store.add_snippet("Work", "other", "other", vec![]).unwrap();

        assert_eq!(store.search("users").len(), 2);
    }

    #[test]
    fn from_folders_drops_duplicate_names() {
        let store = SnippetStore::from_folders(vec![
            SnippetFolder::new("A"),
            SnippetFolder::new("A"),
            SnippetFolder::new("B"),
        ]);
        assert_eq!(store.folder_names(), vec!["A", "B"]);
    }

    fn folder_with(name: &str, contents: &[&str]) -> SnippetFolder {
        let mut folder = SnippetFolder::new(name);
        folder.snippets = contents.iter().map(|c| Snippet::new(*c, *c, vec![])).collect();
        folder
    }

    #[test]
    fn import_merges_new_folders_and_reports_conflicts() {
        let mut store = store_with(&["Work"]);
        store.add_snippet("Work", "mine", "mine", vec![]).unwrap();
        store.mark_clean();

        let imported = store
            .import(vec![folder_with("Work", &["theirs"]), folder_with("Shell", &["ls -la", "pwd"])])
            .unwrap();

        assert_eq!(imported.folders, vec!["Shell"]);
        assert_eq!(imported.snippets, 2);
        assert_eq!(imported.conflicts, vec!["Work"]);
        assert_eq!(store.folder_names(), vec!["Work", "Shell"]);
        assert_eq!(store.folder("Work").unwrap().snippets[0].content, "mine");
        assert!(store.is_dirty());
    }

    #[test]
    fn exported_folders_import_into_an_empty_store() {
        let mut source = store_with(&["A", "B"]);
        source.add_snippet("B", "{\"k\": 1}", "json", vec!["t".into()]).unwrap();

        let mut target = SnippetStore::new();
        let imported = target.import(source.export()).unwrap();
        assert!(imported.conflicts.is_empty());
        assert_eq!(target.folders(), source.folders());
    }

    #[test]
    fn invalid_import_changes_nothing() {
        let mut store = store_with(&["Work"]);

        let duplicate = store.import(vec![folder_with("New", &[]), folder_with("New", &[])]);
        assert!(matches!(duplicate, Err(StoreError::Invalid(_))));

        let blank = store.import(vec![folder_with("New", &[]), folder_with("Other", &["  "])]);
        assert!(matches!(blank, Err(StoreError::Invalid(_))));

        let unnamed = store.import(vec![folder_with(" ", &["x"])]);
        assert!(matches!(unnamed, Err(StoreError::Invalid(_))));

        assert_eq!(store.folder_names(), vec!["Work"]);
        assert!(!store.is_dirty());
    }
}
