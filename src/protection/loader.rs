use crate::entities::flag::FlagType;
use crate::protection::condition::Condition;
use crate::protection::getters::{Getters, ValueType};
use crate::protection::segment::{ActionKind, RangeSpec, Segment, MAX_RANGE};
use crate::protection::ConfigurationError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProtectionFile {
    getters: Vec<GetterDecl>,
    segments: Vec<SegmentDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetterDecl {
    name: String,
    #[serde(rename = "type")]
    output: ValueType,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SegmentDecl {
    name: String,
    actions: Vec<ActionKind>,
    #[serde(default)]
    kinds: Vec<String>,
    #[serde(default)]
    condition: Option<String>,
    flag: FlagType,
    #[serde(default)]
    range: RangeSpec,
}

/// Getters and segments built from one protection file. Segments that failed
/// to build are left out and their errors kept in `skipped`.
#[derive(Debug)]
pub struct LoadedProtection {
    pub getters: Arc<Getters>,
    pub segments: Vec<Segment>,
    pub skipped: Vec<ConfigurationError>,
}

/// Reads `protection.yml`. A missing file yields no segments.
pub fn load_protection(path: &Path) -> Result<LoadedProtection, ConfigurationError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(target: "protection", "no protection file at {}, nothing is protected", path.display());
            String::new()
        }
        Err(err) => return Err(err.into()),
    };
    parse_protection(&data)
}

pub fn parse_protection(data: &str) -> Result<LoadedProtection, ConfigurationError> {
    let file: ProtectionFile = if data.trim().is_empty() {
        ProtectionFile::default()
    } else {
        serde_yaml::from_str(data)?
    };

    let mut getters = Getters::builtin();
    for decl in &file.getters {
        if getters.contains(&decl.name) {
            return Err(ConfigurationError::Getter {
                getter: decl.name.clone(),
                message: "already defined".to_string(),
            });
        }
        getters.register_attribute(&decl.name, decl.output);
    }
    let getters = Arc::new(getters);

    let mut names = BTreeSet::new();
    let mut segments = Vec::with_capacity(file.segments.len());
    let mut skipped = Vec::new();
    for decl in &file.segments {
        match build_segment(decl, &getters, &mut names) {
            Ok(segment) => segments.push(segment),
            Err(err) => {
                error!(target: "protection", "skipping segment '{}': {}", decl.name, err);
                skipped.push(err);
            }
        }
    }

    info!(
        target: "protection",
        "loaded {} segments and {} getters",
        segments.len(),
        getters.names().count()
    );
    Ok(LoadedProtection {
        getters,
        segments,
        skipped,
    })
}

fn build_segment(
    decl: &SegmentDecl,
    getters: &Arc<Getters>,
    names: &mut BTreeSet<String>,
) -> Result<Segment, ConfigurationError> {
    let invalid = |message: &str| ConfigurationError::Segment {
        segment: decl.name.clone(),
        message: message.to_string(),
    };
    if !names.insert(decl.name.to_ascii_lowercase()) {
        return Err(invalid("duplicate segment name"));
    }
    if decl.actions.is_empty() {
        return Err(invalid("no actions listed"));
    }
    match &decl.range {
        RangeSpec::Fixed(range) if *range > MAX_RANGE => {
            return Err(invalid(&format!("range {range} is above the limit of {MAX_RANGE}")));
        }
        RangeSpec::Fixed(_) => {}
        RangeSpec::Getter(name) => match getters.output_type(name) {
            Some(ValueType::Int) => {}
            Some(_) => return Err(invalid(&format!("range getter '{name}' is not an int"))),
            None => return Err(invalid(&format!("unknown range getter '{name}'"))),
        },
    }

    let mut segment = Segment::new(&decl.name, decl.actions.clone(), decl.flag, getters.clone())
        .with_kinds(decl.kinds.clone())
        .with_range(decl.range.clone());
    if let Some(source) = &decl.condition {
        let condition = Condition::parse(source)?;
        condition.validate(getters)?;
        segment = segment.with_condition(condition);
    }
    Ok(segment)
}
