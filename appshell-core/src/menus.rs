//! Dropdown menus exposed to templates as `site.dropdowns`

use serde::{Deserialize, Serialize};

/// A link inside a dropdown menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    /// Display name, unique within its menu
    pub name: String,
    /// Link target; relative links should start with '/'
    pub url: String,
    /// Open the link in a new tab
    #[serde(default)]
    pub newtab: bool,
}

impl MenuItem {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            newtab: false,
        }
    }
}

/// A named, ordered list of links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownMenu {
    pub name: String,
    pub items: Vec<MenuItem>,
}

impl DropdownMenu {
    /// Update the item with a matching name in place, else append it
    fn merge_item(&mut self, item: MenuItem) {
        match self.items.iter_mut().find(|i| i.name == item.name) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }
}

/// Ordered collection of dropdown menus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropdownMenus(Vec<DropdownMenu>);

impl DropdownMenus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a menu. With `replace` any menu of the same name is
    /// dropped first. Without it the items are merged by name into the
    /// existing menu.
    pub fn add(&mut self, name: &str, items: Vec<MenuItem>, replace: bool) {
        if replace {
            self.remove(name);
        }

        if let Some(menu) = self.0.iter_mut().find(|m| m.name == name) {
            for item in items {
                menu.merge_item(item);
            }
            return;
        }

        let mut menu = DropdownMenu {
            name: name.to_string(),
            items: Vec::with_capacity(items.len()),
        };
        for item in items {
            menu.merge_item(item);
        }
        self.0.push(menu);
    }

    /// Delete the first menu with this name; no-op when absent
    pub fn remove(&mut self, name: &str) {
        if let Some(pos) = self.0.iter().position(|m| m.name == name) {
            self.0.remove(pos);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DropdownMenu> {
        self.0.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DropdownMenu> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
