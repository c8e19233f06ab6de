use std::collections::BTreeMap;

use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

/// Protobuf schema registered while reading the trace.
///
/// Writers ship extension descriptors so that consumers can interpret fields
/// the core does not know about. Messages are keyed by their fully qualified
/// name (`.pkg.Outer.Inner`); a later definition of a known message adds the
/// fields the registered one lacks, and extension fields are attached to the
/// message they extend.
#[derive(Debug, Default)]
pub struct DescriptorPool {
    files: BTreeMap<String, FileDescriptorProto>,
    messages: BTreeMap<String, DescriptorProto>,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every file of `set`.
    ///
    /// Extensions are applied after all messages of the set are registered,
    /// so an extension may target a message defined later in the same set.
    /// Returns the number of extension fields skipped because their extendee
    /// is unknown.
    pub fn add_file_descriptor_set(&mut self, set: FileDescriptorSet) -> usize {
        let mut extensions = Vec::new();
        for file in set.file {
            let scope = qualify("", file.package());
            for message in &file.message_type {
                self.add_message(&scope, message, &mut extensions);
            }
            extensions.extend(file.extension.iter().map(|ext| (scope.clone(), ext.clone())));

            match self.files.get_mut(file.name()) {
                Some(existing) => merge_file(existing, file),
                None => {
                    self.files.insert(file.name().to_string(), file);
                }
            }
        }

        let mut unresolved = 0;
        for (scope, extension) in extensions {
            if !self.add_extension(&scope, extension) {
                unresolved += 1;
            }
        }
        unresolved
    }

    fn add_message(
        &mut self,
        scope: &str,
        message: &DescriptorProto,
        extensions: &mut Vec<(String, FieldDescriptorProto)>,
    ) {
        let full_name = format!("{scope}.{}", message.name());
        for nested in &message.nested_type {
            self.add_message(&full_name, nested, extensions);
        }
        extensions.extend(
            message
                .extension
                .iter()
                .map(|ext| (full_name.clone(), ext.clone())),
        );

        match self.messages.get_mut(&full_name) {
            Some(existing) => {
                for field in &message.field {
                    merge_field(existing, field.clone());
                }
            }
            None => {
                self.messages.insert(full_name, message.clone());
            }
        }
    }

    /// Attaches `extension` to its extendee. Returns false if the extendee is
    /// not registered.
    fn add_extension(&mut self, scope: &str, extension: FieldDescriptorProto) -> bool {
        let extendee = extension.extendee();
        let target = if extendee.starts_with('.') {
            extendee.to_string()
        } else {
            format!("{scope}.{extendee}")
        };
        match self.messages.get_mut(&target) {
            Some(message) => {
                merge_field(message, extension);
                true
            }
            None => {
                log::debug!(
                    "extension field {} targets unknown message {target}",
                    extension.name()
                );
                false
            }
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileDescriptorProto> {
        self.files.get(name)
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Finds a message by its fully qualified name, with or without the
    /// leading dot.
    pub fn find_message(&self, full_name: &str) -> Option<&DescriptorProto> {
        match full_name.strip_prefix('.') {
            Some(_) => self.messages.get(full_name),
            None => self.messages.get(&format!(".{full_name}")),
        }
    }
}

fn qualify(scope: &str, name: &str) -> String {
    match name {
        "" => scope.to_string(),
        name => format!("{scope}.{name}"),
    }
}

/// Adds `field` unless `message` already has a field with its name or number.
fn merge_field(message: &mut DescriptorProto, field: FieldDescriptorProto) {
    let clash = message
        .field
        .iter()
        .any(|f| f.name() == field.name() || f.number() == field.number());
    if !clash {
        message.field.push(field);
    }
}

fn merge_file(existing: &mut FileDescriptorProto, file: FileDescriptorProto) {
    for message in file.message_type {
        match existing
            .message_type
            .iter_mut()
            .find(|m| m.name() == message.name())
        {
            Some(known) => {
                for field in message.field {
                    merge_field(known, field);
                }
            }
            None => existing.message_type.push(message),
        }
    }
    existing.extension.extend(file.extension);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(name: &str, fields: &[(&str, i32)]) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: fields
                .iter()
                .map(|(name, number)| FieldDescriptorProto {
                    name: Some(name.to_string()),
                    number: Some(*number),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn file(name: &str, package: &str, messages: Vec<DescriptorProto>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some(package.to_string()),
            message_type: messages,
            ..Default::default()
        }
    }

    fn extension(name: &str, number: i32, extendee: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            extendee: Some(extendee.to_string()),
            ..Default::default()
        }
    }

    fn field_names(pool: &DescriptorPool, full_name: &str) -> Vec<String> {
        pool.find_message(full_name)
            .unwrap()
            .field
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    fn add(pool: &mut DescriptorPool, files: Vec<FileDescriptorProto>) -> usize {
        pool.add_file_descriptor_set(FileDescriptorSet { file: files })
    }

    #[test]
    fn test_merge_existing_file() {
        let mut pool = DescriptorPool::new();
        add(&mut pool, vec![file("ext.proto", "acme", vec![message("A", &[])])]);
        add(
            &mut pool,
            vec![file(
                "ext.proto",
                "acme",
                vec![message("A", &[]), message("B", &[])],
            )],
        );

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.file("ext.proto").unwrap().message_type.len(), 2);
        assert!(pool.find_message(".acme.B").is_some());
        assert!(pool.find_message("acme.B").is_some());
        assert!(pool.find_message("acme.C").is_none());
    }

    #[test]
    fn test_redefined_message_gains_missing_fields() {
        let mut pool = DescriptorPool::new();
        add(
            &mut pool,
            vec![file("a.proto", "p", vec![message("TrackEvent", &[("x", 1)])])],
        );
        add(
            &mut pool,
            vec![file(
                "a.proto",
                "p",
                vec![message("TrackEvent", &[("x", 1), ("y", 2)])],
            )],
        );
        // Same message from a different file.
        add(
            &mut pool,
            vec![file("b.proto", "p", vec![message("TrackEvent", &[("z", 3)])])],
        );

        assert_eq!(field_names(&pool, ".p.TrackEvent"), vec!["x", "y", "z"]);
        assert_eq!(pool.file("a.proto").unwrap().message_type[0].field.len(), 2);
    }

    #[test]
    fn test_extension_fields_attach_to_extendee() {
        let mut pool = DescriptorPool::new();
        add(
            &mut pool,
            vec![file("a.proto", "p", vec![message("TrackEvent", &[("x", 1)])])],
        );
        let ext = FileDescriptorProto {
            extension: vec![
                extension("ext_field", 1000, ".p.TrackEvent"),
                extension("clashing", 1, ".p.TrackEvent"),
            ],
            ..file("ext.proto", "q", vec![])
        };
        assert_eq!(add(&mut pool, vec![ext]), 0);

        assert_eq!(field_names(&pool, ".p.TrackEvent"), vec!["x", "ext_field"]);
        let added = &pool.find_message(".p.TrackEvent").unwrap().field[1];
        assert_eq!(added.extendee(), ".p.TrackEvent");
    }

    #[test]
    fn test_extension_declared_before_its_extendee_in_one_set() {
        let mut pool = DescriptorPool::new();
        let ext = FileDescriptorProto {
            extension: vec![extension("late", 50, "Target")],
            ..file("ext.proto", "p", vec![])
        };
        let target = file("target.proto", "p", vec![message("Target", &[])]);
        assert_eq!(add(&mut pool, vec![ext, target]), 0);
        assert_eq!(field_names(&pool, "p.Target"), vec!["late"]);
    }

    #[test]
    fn test_nested_messages_and_unknown_extendee() {
        let mut outer = message("Outer", &[]);
        outer.nested_type.push(message("Inner", &[("a", 1)]));
        outer.extension.push(extension("b", 2, ".p.Outer.Inner"));

        let mut pool = DescriptorPool::new();
        let unresolved = add(
            &mut pool,
            vec![FileDescriptorProto {
                extension: vec![extension("orphan", 9, ".p.Missing")],
                ..file("n.proto", "p", vec![outer])
            }],
        );

        assert_eq!(unresolved, 1);
        assert_eq!(field_names(&pool, ".p.Outer.Inner"), vec!["a", "b"]);
    }

    #[test]
    fn test_find_message_without_package() {
        let mut pool = DescriptorPool::new();
        add(&mut pool, vec![file("plain.proto", "", vec![message("Top", &[])])]);
        assert!(pool.find_message(".Top").is_some());
    }
}
