//! Declaration-section extraction, merging and deduplication.
//!
//! Each compiled node contributes a [`ShaderSections`] bundle; the compiler
//! merges bundles in dependency order and renders the result once, applying
//! the dedup rules at assembly time so merging stays a cheap concatenation.

use std::fmt::Write;

use crate::glsl::ast::{
    Declaration, Declarator, ExternalItem, InterfaceBlock, PrecisionQual, StorageQual,
    TranslationUnit, TypeSpec,
};

/// Knobs the engine adapter sets for final assembly.
#[derive(Clone, Copy, Debug)]
pub struct MergeOptions {
    /// Emit the `#version` line (first occurrence wins).
    pub include_version: bool,
    /// Emit the deduplicated `precision` statements.
    pub include_precision: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            include_version: true,
            include_precision: true,
        }
    }
}

/// Top-level items of one or more programs, bucketed by kind.
///
/// Buckets keep insertion order; all deduplication happens in [`render`].
///
/// [`render`]: ShaderSections::render
#[derive(Clone, Debug, Default)]
pub struct ShaderSections {
    pub version: Vec<ExternalItem>,
    pub precision: Vec<ExternalItem>,
    pub preprocessor: Vec<ExternalItem>,
    pub structs: Vec<ExternalItem>,
    pub inputs: Vec<ExternalItem>,
    pub outputs: Vec<ExternalItem>,
    pub uniforms: Vec<ExternalItem>,
    pub program: Vec<ExternalItem>,
}

impl ShaderSections {
    /// Classify every top-level item of `unit` into its bucket.
    pub fn from_unit(unit: &TranslationUnit) -> Self {
        let mut sections = Self::default();

        for item in &unit.items {
            match item {
                ExternalItem::Directive(line) => {
                    if line.trim_start().starts_with("#version") {
                        sections.version.push(item.clone());
                    } else {
                        sections.preprocessor.push(item.clone());
                    }
                }
                ExternalItem::Precision { .. } => sections.precision.push(item.clone()),
                ExternalItem::Struct(_) => sections.structs.push(item.clone()),
                ExternalItem::LayoutDefault { storage, .. } => {
                    if *storage == StorageQual::Uniform {
                        sections.uniforms.push(item.clone());
                    } else {
                        sections.program.push(item.clone());
                    }
                }
                ExternalItem::Block(block) => {
                    if block.has_storage(StorageQual::Uniform) {
                        sections.uniforms.push(item.clone());
                    } else if block.has_storage(StorageQual::In) {
                        sections.inputs.push(item.clone());
                    } else if block.has_storage(StorageQual::Out) {
                        sections.outputs.push(item.clone());
                    } else {
                        sections.program.push(item.clone());
                    }
                }
                ExternalItem::Declaration(decl) => {
                    if decl.has_storage(StorageQual::Uniform) {
                        sections.uniforms.push(item.clone());
                    } else if decl.has_storage(StorageQual::In)
                        || decl.has_storage(StorageQual::Attribute)
                    {
                        sections.inputs.push(item.clone());
                    } else if decl.has_storage(StorageQual::Out)
                        || decl.has_storage(StorageQual::Varying)
                    {
                        sections.outputs.push(item.clone());
                    } else {
                        sections.program.push(item.clone());
                    }
                }
                ExternalItem::Function(_) => sections.program.push(item.clone()),
            }
        }

        sections
    }

    /// Append `other`'s buckets after this bundle's.
    pub fn merge(&mut self, other: ShaderSections) {
        self.version.extend(other.version);
        self.precision.extend(other.precision);
        self.preprocessor.extend(other.preprocessor);
        self.structs.extend(other.structs);
        self.inputs.extend(other.inputs);
        self.outputs.extend(other.outputs);
        self.uniforms.extend(other.uniforms);
        self.program.extend(other.program);
    }

    /// Render the final program text in the fixed assembly order, applying
    /// the per-bucket deduplication rules.
    pub fn render(&self, options: &MergeOptions) -> String {
        let mut out = String::new();

        if options.include_version {
            if let Some(version) = self.version.first() {
                let _ = writeln!(out, "{version}");
            }
        }
        if options.include_precision {
            for line in dedup_precision(&self.precision) {
                let _ = writeln!(out, "{line}");
            }
        }
        for item in &self.preprocessor {
            let _ = writeln!(out, "{item}");
        }
        for item in &self.structs {
            let _ = writeln!(out, "{item}");
        }
        for line in dedup_io(&self.inputs) {
            let _ = writeln!(out, "{line}");
        }
        for line in dedup_io(&self.outputs) {
            let _ = writeln!(out, "{line}");
        }
        for line in dedup_uniforms(&self.uniforms) {
            let _ = writeln!(out, "{line}");
        }
        for item in &self.program {
            let _ = writeln!(out, "{item}");
        }

        out
    }
}

/// One statement per base type, at the highest precision seen.
fn dedup_precision(items: &[ExternalItem]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut best: Vec<(String, PrecisionQual)> = Vec::new();

    for item in items {
        if let ExternalItem::Precision { qual, ty } = item {
            match best.iter_mut().find(|(name, _)| name == ty) {
                Some((_, current)) => {
                    if *qual > *current {
                        *current = *qual;
                    }
                }
                None => {
                    order.push(ty.clone());
                    best.push((ty.clone(), *qual));
                }
            }
        }
    }

    order
        .iter()
        .map(|ty| {
            let qual = best.iter().find(|(name, _)| name == ty).unwrap().1;
            format!("precision {qual} {ty};")
        })
        .collect()
}

/// Per-type comma-joined stage interface declarations.
///
/// Names are deduplicated first-wins, as are the qualifiers of each type
/// group. Interface blocks dedup by block name.
fn dedup_io(items: &[ExternalItem]) -> Vec<String> {
    enum Entry {
        Plain(Declaration),
        Raw(String),
    }

    let mut entries: Vec<(String, Entry)> = Vec::new();

    for item in items {
        match item {
            ExternalItem::Declaration(decl) => {
                let key = decl.ty.to_string();
                match entries.iter_mut().find_map(|(k, entry)| match entry {
                    Entry::Plain(merged) if *k == key => Some(merged),
                    _ => None,
                }) {
                    Some(merged) => {
                        for declarator in &decl.declarators {
                            if !merged.declarators.iter().any(|d| d.name == declarator.name) {
                                merged.declarators.push(declarator.clone());
                            }
                        }
                    }
                    None => entries.push((key, Entry::Plain(decl.clone()))),
                }
            }
            ExternalItem::Block(block) => {
                let key = format!("block:{}", block.name);
                if !entries.iter().any(|(k, _)| *k == key) {
                    entries.push((key, Entry::Raw(block.to_string())));
                }
            }
            other => entries.push((other.to_string(), Entry::Raw(other.to_string()))),
        }
    }

    entries
        .into_iter()
        .map(|(_, entry)| match entry {
            Entry::Plain(decl) => decl.to_string(),
            Entry::Raw(text) => text,
        })
        .collect()
}

/// Uniform deduplication: plain declarations collapse per type with
/// comma-joined names, the interface-block form of a type beats the bare
/// form regardless of encounter order, and a repeated array name keeps the
/// size of its later occurrence.
fn dedup_uniforms(items: &[ExternalItem]) -> Vec<String> {
    enum Entry {
        /// `layout(...) uniform;` line, deduped by rendered text.
        Default(String),
        Plain(Declaration),
        Block {
            block: InterfaceBlock,
            instances: Vec<String>,
        },
        /// Instances seen before their block declaration arrived.
        PendingInstances(Vec<String>),
    }

    // Pre-pass so a bare `uniform Light0 x;` seen before the `Light0 { .. }`
    // block still lands under the block key.
    let block_names: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            ExternalItem::Block(block) => Some(block.name.clone()),
            _ => None,
        })
        .collect();

    let mut entries: Vec<(String, Entry)> = Vec::new();

    let mut record_instance = |entries: &mut Vec<(String, Entry)>, key: String, name: String| {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, Entry::Block { block, instances })) => {
                if block.instance.as_deref() != Some(&name) && !instances.contains(&name) {
                    instances.push(name);
                }
            }
            Some((_, Entry::PendingInstances(names))) => {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            _ => entries.push((key, Entry::PendingInstances(vec![name]))),
        }
    };

    for item in items {
        match item {
            ExternalItem::LayoutDefault { .. } => {
                let text = item.to_string();
                if !entries.iter().any(|(k, _)| *k == text) {
                    entries.push((text.clone(), Entry::Default(text)));
                }
            }
            ExternalItem::Block(block) => {
                let key = block.name.clone();
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, entry)) => {
                        if let Entry::PendingInstances(names) = entry {
                            let mut instances = std::mem::take(names);
                            if let Some(own) = &block.instance {
                                instances.retain(|name| name != own);
                            }
                            *entry = Entry::Block {
                                block: block.clone(),
                                instances,
                            };
                        }
                        // A second block with the same name: first wins.
                    }
                    None => entries.push((
                        key,
                        Entry::Block {
                            block: block.clone(),
                            instances: Vec::new(),
                        },
                    )),
                }
            }
            ExternalItem::Declaration(decl) => {
                if block_names.contains(&decl.ty.name) {
                    for declarator in &decl.declarators {
                        record_instance(&mut entries, decl.ty.name.clone(), declarator.name.clone());
                    }
                    continue;
                }

                let key = decl.ty.name.clone();
                match entries.iter_mut().find_map(|(k, entry)| match entry {
                    Entry::Plain(merged) if *k == key => Some(merged),
                    _ => None,
                }) {
                    Some(merged) => {
                        for declarator in &decl.declarators {
                            match merged
                                .declarators
                                .iter_mut()
                                .find(|d| d.name == declarator.name)
                            {
                                // Later occurrence wins the array size.
                                Some(existing) => {
                                    if declarator.array.is_some() {
                                        existing.array = declarator.array.clone();
                                    }
                                }
                                None => merged.declarators.push(declarator.clone()),
                            }
                        }
                    }
                    None => entries.push((key, Entry::Plain(decl.clone()))),
                }
            }
            other => {
                entries.push((other.to_string(), Entry::Default(other.to_string())));
            }
        }
    }

    entries
        .into_iter()
        .flat_map(|(_, entry)| match entry {
            Entry::Default(text) => vec![text],
            Entry::Plain(decl) => vec![decl.to_string()],
            Entry::Block { block, instances } => {
                let mut block = block;
                let mut extra = instances.into_iter();
                if block.instance.is_none() {
                    block.instance = extra.next();
                }

                // Further instance names stay declared, as bare declarations
                // of the block type.
                let mut lines = vec![block.to_string()];
                for name in extra {
                    lines.push(
                        Declaration {
                            qualifiers: block.qualifiers.clone(),
                            ty: TypeSpec::named(&block.name),
                            declarators: vec![Declarator::named(&name)],
                        }
                        .to_string(),
                    );
                }
                lines
            }
            Entry::PendingInstances(names) => {
                // No block ever arrived; cannot happen given the pre-pass,
                // but render something sensible rather than panic.
                vec![names.join(", ")]
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::glsl::parse_program;

    fn sections(source: &str) -> ShaderSections {
        ShaderSections::from_unit(&parse_program(source).unwrap())
    }

    fn rendered(source: &str) -> String {
        sections(source).render(&MergeOptions::default())
    }

    mod classify {
        use super::*;

        #[test]
        fn items_land_in_their_buckets() {
            let sections = sections(
                "#version 300 es\n\
                 precision highp float;\n\
                 #extension GL_OES_standard_derivatives : enable\n\
                 struct Light { vec3 dir; };\n\
                 in vec2 uv;\n\
                 out vec4 fragColor;\n\
                 uniform float time;\n\
                 void main() {}",
            );

            assert_eq!(sections.version.len(), 1);
            assert_eq!(sections.precision.len(), 1);
            assert_eq!(sections.preprocessor.len(), 1);
            assert_eq!(sections.structs.len(), 1);
            assert_eq!(sections.inputs.len(), 1);
            assert_eq!(sections.outputs.len(), 1);
            assert_eq!(sections.uniforms.len(), 1);
            assert_eq!(sections.program.len(), 1);
        }

        #[test]
        fn legacy_storage_maps_to_stage_interface() {
            let sections = sections("attribute vec3 position;\nvarying vec2 vUv;");
            assert_eq!(sections.inputs.len(), 1);
            assert_eq!(sections.outputs.len(), 1);
        }
    }

    mod dedup {
        use super::*;

        #[test]
        fn version_first_wins() {
            let mut a = sections("#version 300 es\nvoid main() {}");
            a.merge(sections("#version 310 es\nvoid other() {}"));
            let text = a.render(&MergeOptions::default());
            assert!(text.contains("#version 300 es"));
            assert!(!text.contains("#version 310 es"));
        }

        #[test]
        fn precision_keeps_the_highest() {
            let mut a = sections("precision lowp float;");
            a.merge(sections("precision highp float;\nprecision mediump int;"));
            let text = a.render(&MergeOptions::default());
            assert!(text.contains("precision highp float;"));
            assert!(text.contains("precision mediump int;"));
            assert!(!text.contains("lowp"));
        }

        #[test]
        fn stage_inputs_join_per_type() {
            let mut a = sections("in vec2 uv;");
            a.merge(sections("in vec2 vUv;\nin vec2 uv;\nin vec3 normal;"));
            let text = a.render(&MergeOptions::default());
            assert!(text.contains("in vec2 uv, vUv;"));
            assert!(text.contains("in vec3 normal;"));
        }

        #[test]
        fn uniform_names_collapse_per_type() {
            let mut a = sections("uniform float time;");
            a.merge(sections("uniform float speed, time;"));
            let text = a.render(&MergeOptions::default());
            assert!(text.contains("uniform float time, speed;"));
        }

        #[test]
        fn later_array_size_wins() {
            let mut a = sections("uniform float lights[5];");
            a.merge(sections("uniform float lights[8];"));
            let text = a.render(&MergeOptions::default());
            assert!(text.contains("uniform float lights[8];"));
            assert!(!text.contains("[5]"));
        }

        #[test]
        fn block_beats_bare_in_either_order() {
            let block = "uniform Light0 {\n    vec4 y;\n} x;";

            let mut bare_first = sections("uniform Light0 x;");
            bare_first.merge(sections(block));
            assert!(bare_first.render(&MergeOptions::default()).contains(block));

            let mut block_first = sections(block);
            block_first.merge(sections("uniform Light0 x;"));
            let text = block_first.render(&MergeOptions::default());
            assert!(text.contains(block));
            assert!(!text.contains("uniform Light0 x;"));
        }

        #[test]
        fn self_merge_is_idempotent() {
            let source = "#version 300 es\n\
                          precision highp float;\n\
                          in vec2 uv;\n\
                          uniform float time;\n\
                          uniform Scene { mat4 view; } scene;";
            let mut doubled = sections(source);
            doubled.merge(sections(source));

            assert_eq!(
                doubled.render(&MergeOptions::default()),
                rendered(source),
            );
        }

        #[test]
        fn uniform_content_is_order_independent() {
            let a = "uniform float time;\nuniform vec3 color;";
            let b = "uniform vec3 color;\nuniform float speed;";

            let mut ab = sections(a);
            ab.merge(sections(b));
            let mut ba = sections(b);
            ba.merge(sections(a));

            let text_ab = ab.render(&MergeOptions::default());
            let text_ba = ba.render(&MergeOptions::default());

            // Comma-join order inside a type group follows encounter order,
            // so the renders compare by declared content, not exact text.
            for name in ["time", "speed", "color"] {
                assert!(text_ab.contains(name), "`{name}` missing from ab");
                assert!(text_ba.contains(name), "`{name}` missing from ba");
            }
            assert_eq!(text_ab.lines().count(), text_ba.lines().count());
        }

        #[test]
        fn extra_block_instances_keep_their_declarations() {
            let block = "uniform Light0 {\n    vec4 y;\n} x;";

            let mut block_first = sections(block);
            block_first.merge(sections("uniform Light0 z;"));
            let text = block_first.render(&MergeOptions::default());
            assert!(text.contains(block));
            assert!(text.contains("uniform Light0 z;"));

            let mut bare_first = sections("uniform Light0 z;");
            bare_first.merge(sections(block));
            let text = bare_first.render(&MergeOptions::default());
            assert!(text.contains(block));
            assert!(text.contains("uniform Light0 z;"));
        }
    }

    #[test]
    fn options_can_omit_version_and_precision() {
        let text = sections("#version 300 es\nprecision highp float;\nvoid main() {}").render(
            &MergeOptions {
                include_version: false,
                include_precision: false,
            },
        );
        assert!(!text.contains("#version"));
        assert!(!text.contains("precision"));
        assert!(text.contains("void main() {"));
    }
}
