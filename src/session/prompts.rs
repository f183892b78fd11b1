use std::collections::HashMap;
use tracing::warn;

use crate::mailbox::{Folder, MenuAction};
use crate::services::{apply_replacements, Replacements};

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "intro_summary",
        &["vm-youhave", "digits/{unread}", "vm-INBOX", "vm-and", "digits/{read}", "vm-Old", "vm-messages", "vm-in", "{folder}"],
    ),
    ("intro_empty", &["vm-youhave", "vm-no", "vm-messages", "vm-in", "{folder}"]),
    ("menu_first", &["vm-onefor", "vm-first"]),
    ("menu_previous", &["vm-press", "digits/4", "vm-prev"]),
    ("menu_repeat", &["vm-press", "digits/5", "vm-repeat"]),
    ("menu_next", &["vm-press", "digits/6", "vm-next"]),
    ("menu_delete", &["vm-press", "digits/7", "vm-delete"]),
    ("menu_options", &["vm-press", "digits/2", "vm-changefolder", "vm-star-cancel"]),
    ("message_first", &["vm-first", "vm-message"]),
    ("message_last", &["vm-last", "vm-message"]),
    ("message_number", &["vm-message", "digits/{number}"]),
    ("message_received", &["vm-received", "{received}"]),
    ("message_none", &["vm-nomore"]),
    ("message_deleted", &["vm-msgdeleted"]),
    ("message_saved", &["vm-msgsaved"]),
    ("folder_select", &["vm-changeto"]),
    ("folder_option", &["vm-press", "digits/{selector}", "vm-for"]),
    ("folder_invalid", &["vm-invalid-folder"]),
    ("goodbye", &["vm-goodbye"]),
    ("writer_greeting", &["vm-intro"]),
    ("writer_beep", &["beep"]),
];

/// Sound keys for every prompt the controllers play, by symbolic name
#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: HashMap<String, Vec<String>>,
}

impl Default for PromptSet {
    fn default() -> Self {
        let prompts = BUILTIN
            .iter()
            .map(|(name, keys)| {
                (
                    name.to_string(),
                    keys.iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect();
        Self { prompts }
    }
}

impl PromptSet {
    /// Built-in prompts with configured entries replacing them
    pub fn with_overrides(overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut set = Self::default();
        for (name, keys) in overrides {
            set.prompts.insert(name.clone(), keys.clone());
        }
        set
    }

    pub fn get(&self, name: &str) -> Vec<String> {
        match self.prompts.get(name) {
            Some(keys) => keys.clone(),
            None => {
                warn!("No prompt configured for {}", name);
                Vec::new()
            }
        }
    }

    /// Menu read-out for the given actions, followed by the folder/exit options
    pub fn menu(&self, actions: &[MenuAction]) -> Vec<String> {
        let mut keys: Vec<String> = actions
            .iter()
            .flat_map(|action| self.get(&format!("menu_{}", action.as_str())))
            .collect();
        keys.extend(self.get("menu_options"));
        keys
    }

    /// "Change to: press 0 for INBOX, press 1 for Old, ..."
    pub fn folder_selection(&self, folders: &[Folder]) -> Vec<String> {
        let mut keys = self.get("folder_select");
        let option = self.get("folder_option");
        for folder in folders {
            let replacements =
                Replacements::from([("selector".to_string(), folder.selector.clone())]);
            keys.extend(apply_replacements(&option, &replacements));
            keys.push(folder.display_key.clone());
        }
        keys
    }
}
