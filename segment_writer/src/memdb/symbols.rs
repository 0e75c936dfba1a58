//! Deduplicating symbol accumulation for one head.

use std::collections::HashMap;

use block::format::{Stacktrace, SymFunction, SymLine, SymLocation, SymMapping, Symbols};
use pprof::{Function, Location, Mapping, Profile};

use crate::IngestError;

/// Accumulates the strings, mappings, functions, locations and stacktraces
/// referenced by a head's samples, deduplicated across profiles.
#[derive(Debug)]
pub(crate) struct SymbolsBuilder {
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    mappings: Vec<SymMapping>,
    mapping_index: HashMap<(u32, u32, bool), u32>,
    functions: Vec<SymFunction>,
    function_index: HashMap<(u32, u32, u32, i64), u32>,
    locations: Vec<SymLocation>,
    location_index: HashMap<(u32, u64, Vec<(u32, i64)>), u32>,
    stacktraces: Vec<Stacktrace>,
    stacktrace_index: HashMap<Vec<u32>, u32>,
}

impl Default for SymbolsBuilder {
    fn default() -> Self {
        Self {
            strings: vec![String::new()],
            string_index: HashMap::from([(String::new(), 0)]),
            mappings: Vec::new(),
            mapping_index: HashMap::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            locations: Vec::new(),
            location_index: HashMap::new(),
            stacktraces: Vec::new(),
            stacktrace_index: HashMap::new(),
        }
    }
}

/// Id-indexed views of a profile's symbol tables, built once per ingest.
pub(crate) struct ProfileSymbols<'a> {
    profile: &'a Profile,
    locations: HashMap<u64, &'a Location>,
    mappings: HashMap<u64, &'a Mapping>,
    functions: HashMap<u64, &'a Function>,
}

impl<'a> ProfileSymbols<'a> {
    pub(crate) fn new(profile: &'a Profile) -> Self {
        Self {
            profile,
            locations: profile.location.iter().map(|l| (l.id, l)).collect(),
            mappings: profile.mapping.iter().map(|m| (m.id, m)).collect(),
            functions: profile.function.iter().map(|f| (f.id, f)).collect(),
        }
    }

    fn string(&self, i: i64) -> &'a str {
        usize::try_from(i)
            .ok()
            .and_then(|i| self.profile.string_table.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl SymbolsBuilder {
    fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.string_index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), i);
        i
    }

    /// Intern one sample's call stack, returning its stacktrace id.
    ///
    /// Returns the stacktrace id plus whether any referenced location lacks
    /// function info in its mapping (an unsymbolized sample).
    pub(crate) fn intern_stacktrace(
        &mut self,
        src: &ProfileSymbols<'_>,
        location_ids: &[u64],
    ) -> Result<(u32, bool), IngestError> {
        let mut unsymbolized = false;
        let mut locations = Vec::with_capacity(location_ids.len());
        for id in location_ids {
            let location = src.locations.get(id).ok_or_else(|| {
                IngestError::Malformed(format!("sample references unknown location {id}"))
            })?;
            let mapping = match location.mapping_id {
                0 => None,
                id => Some(src.mappings.get(&id).ok_or_else(|| {
                    IngestError::Malformed(format!("location references unknown mapping {id}"))
                })?),
            };
            if !mapping.is_some_and(|m| m.has_functions) {
                unsymbolized = true;
            }
            locations.push(self.intern_location(src, location, mapping.copied().copied()));
        }

        if let Some(&i) = self.stacktrace_index.get(&locations) {
            return Ok((i, unsymbolized));
        }
        let i = self.stacktraces.len() as u32;
        self.stacktrace_index.insert(locations.clone(), i);
        self.stacktraces.push(Stacktrace { locations });
        Ok((i, unsymbolized))
    }

    fn intern_location(
        &mut self,
        src: &ProfileSymbols<'_>,
        location: &Location,
        mapping: Option<Mapping>,
    ) -> u32 {
        let mapping_idx = match mapping {
            None => 0,
            Some(m) => self.intern_mapping(src, &m) + 1,
        };
        let lines: Vec<(u32, i64)> = location
            .line
            .iter()
            .map(|line| {
                let function = src.functions.get(&line.function_id);
                let function_idx = match function {
                    Some(f) => {
                        let name = self.intern_string(src.string(f.name));
                        let system_name = self.intern_string(src.string(f.system_name));
                        let filename = self.intern_string(src.string(f.filename));
                        self.intern_function(name, system_name, filename, f.start_line)
                    }
                    // Unknown function: an anonymous frame.
                    None => self.intern_function(0, 0, 0, 0),
                };
                (function_idx, line.line)
            })
            .collect();

        let key = (mapping_idx, location.address, lines.clone());
        if let Some(&i) = self.location_index.get(&key) {
            return i;
        }
        let i = self.locations.len() as u32;
        self.location_index.insert(key, i);
        self.locations.push(SymLocation {
            mapping: mapping_idx,
            address: location.address,
            lines: lines
                .into_iter()
                .map(|(function, line)| SymLine { function, line })
                .collect(),
        });
        i
    }

    fn intern_mapping(&mut self, src: &ProfileSymbols<'_>, m: &Mapping) -> u32 {
        let filename = self.intern_string(src.string(m.filename));
        let build_id = self.intern_string(src.string(m.build_id));
        let key = (filename, build_id, m.has_functions);
        if let Some(&i) = self.mapping_index.get(&key) {
            return i;
        }
        let i = self.mappings.len() as u32;
        self.mapping_index.insert(key, i);
        self.mappings.push(SymMapping {
            filename,
            build_id,
            has_functions: m.has_functions,
        });
        i
    }

    fn intern_function(&mut self, name: u32, system_name: u32, filename: u32, start_line: i64) -> u32 {
        let key = (name, system_name, filename, start_line);
        if let Some(&i) = self.function_index.get(&key) {
            return i;
        }
        let i = self.functions.len() as u32;
        self.function_index.insert(key, i);
        self.functions.push(SymFunction {
            name,
            system_name,
            filename,
            start_line,
        });
        i
    }

    /// Resolve a stacktrace to frame function names, leaf-first.
    pub(crate) fn frames(&self, stacktrace_id: u32) -> Vec<String> {
        let Some(stack) = self.stacktraces.get(stacktrace_id as usize) else {
            return Vec::new();
        };
        let mut frames = Vec::with_capacity(stack.locations.len());
        for &loc in &stack.locations {
            let Some(location) = self.locations.get(loc as usize) else {
                continue;
            };
            for line in &location.lines {
                let name = self
                    .functions
                    .get(line.function as usize)
                    .and_then(|f| self.strings.get(f.name as usize))
                    .cloned()
                    .unwrap_or_default();
                frames.push(name);
            }
        }
        frames
    }

    /// Snapshot the accumulated table as the symbols region payload.
    pub(crate) fn to_symbols(&self) -> Symbols {
        Symbols {
            strings: self.strings.clone(),
            mappings: self.mappings.clone(),
            functions: self.functions.clone(),
            locations: self.locations.clone(),
            stacktraces: self.stacktraces.clone(),
        }
    }
}
