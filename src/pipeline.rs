//! End-to-end extraction run
//!
//! [`MibExtractor`] drives every stage: per-file cleaning, filtering and
//! parsing (in parallel), linking, calibration collection, then packet
//! construction per configured root (in parallel). Defects never abort the
//! run; they are gathered into one [`Diagnostics`] ordered by stage.

use crate::calibration::{CalibrationCatalog, CalibrationCurve, VerificationStage};
use crate::config::{ExtractConfig, PacketRoot};
use crate::error::{Diagnostic, Diagnostics, Result};
use crate::linker::{link, LinkedTable};
use crate::packet::{BuildOutput, Packet, PacketBuilder};
use crate::parallel::parallel_map;
use crate::parser::{parse_file, FileId, SourceFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output of one run
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    /// One packet per root that exists, in root order
    pub packets: Vec<Packet>,
    /// Curves referenced by any packet, keyed by identifier
    pub calibrations: BTreeMap<String, CalibrationCurve>,
    /// Every verification stage defined in the sources
    pub stages: Vec<VerificationStage>,
    /// The linked symbol table, for callers that need more than packets
    #[serde(skip)]
    pub table: LinkedTable,
    pub diagnostics: Diagnostics,
}

impl Extraction {
    pub fn packet(&self, name: &str) -> Option<&Packet> {
        self.packets.iter().find(|p| p.name == name)
    }

    pub fn calibration(&self, ident: &str) -> Option<&CalibrationCurve> {
        self.calibrations.get(ident)
    }

    /// Serialize the model and diagnostics as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("cannot serialize extraction: {}", e)))
    }
}

/// Runs the extraction pipeline with one configuration
pub struct MibExtractor {
    config: ExtractConfig,
}

impl MibExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        MibExtractor { config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Read `paths` and extract; unreadable files become diagnostics
    pub fn extract_paths(&self, paths: &[PathBuf]) -> Result<Extraction> {
        let mut diagnostics = Diagnostics::new();
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            match SourceFile::read(path) {
                Ok(source) => sources.push(source),
                Err(error) => diagnostics.push(Diagnostic::new(error)),
            }
        }
        let mut extraction = self.extract_sources(sources)?;
        diagnostics.merge(std::mem::take(&mut extraction.diagnostics));
        extraction.diagnostics = diagnostics;
        Ok(extraction)
    }

    /// Extract from in-memory sources
    ///
    /// Files get ids in input order; the result does not depend on it.
    /// `Err` only when the worker pool cannot be created.
    pub fn extract_sources(&self, sources: Vec<SourceFile>) -> Result<Extraction> {
        let config = &self.config;
        tracing::info!(
            files = sources.len(),
            roots = config.roots.len(),
            "starting extraction"
        );

        let indexed: Vec<(FileId, SourceFile)> = sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| (FileId(i), source))
            .collect();
        let parsed = parallel_map(
            &indexed,
            |(id, source)| parse_file(*id, source, &config.macros),
            &config.parallel,
        )?;

        let mut diagnostics = Diagnostics::new();
        for file in &parsed {
            diagnostics.merge(file.diagnostics.clone());
        }

        let (table, link_diagnostics) = link(parsed, &config.macros);
        diagnostics.merge(link_diagnostics);

        let (catalog, catalog_diagnostics) = CalibrationCatalog::build(&table);
        diagnostics.merge(catalog_diagnostics);

        let builder = PacketBuilder::new(&table, &catalog, &config.headers);
        let outputs: Vec<BuildOutput> = parallel_map(
            &config.roots,
            |root: &PacketRoot| builder.build(root),
            &config.parallel,
        )?;

        let mut packets = Vec::with_capacity(outputs.len());
        let mut calibrations = BTreeMap::new();
        for output in outputs {
            diagnostics.merge(output.diagnostics);
            for curve in output.calibrations {
                calibrations.entry(curve.ident.clone()).or_insert(curve);
            }
            packets.extend(output.packet);
        }
        let stages = catalog.stages().cloned().collect();

        tracing::info!(
            packets = packets.len(),
            calibrations = calibrations.len(),
            defects = diagnostics.len(),
            "extraction finished"
        );
        Ok(Extraction {
            packets,
            calibrations,
            stages,
            table,
            diagnostics,
        })
    }
}
