//! Notebook document files.
//!
//! A document is either `{"title": ..., "cells": [...]}` or a bare array of
//! cells, each in the engine's cell format:
//!
//! ```json
//! { "id": 1, "cellType": "code", "language": "expr", "content": "6 * 7" }
//! ```

use std::path::Path;

use anyhow::Context;
use nova_core::Cell;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NotebookDocument {
    #[serde(default)]
    pub title: Option<String>,
    pub cells: Vec<Cell>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    Document(NotebookDocument),
    Cells(Vec<Cell>),
}

impl NotebookDocument {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("invalid notebook document {}", path.display()))
    }

    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let file: DocumentFile = serde_json::from_str(source)?;
        Ok(match file {
            DocumentFile::Document(document) => document,
            DocumentFile::Cells(cells) => Self { title: None, cells },
        })
    }

    /// Title to show in the report header.
    pub fn display_name(&self, path: &Path) -> String {
        self.title.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "notebook".to_string())
        })
    }
}
