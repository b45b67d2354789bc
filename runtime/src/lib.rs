// Copyright 2026 Sitegauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sitegauge runtime: site discovery, template-aware incremental
//! accessibility audits, and a live progress API.

pub mod acquisition;
pub mod audit;
pub mod cartography;
pub mod cli;
pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod rest;
