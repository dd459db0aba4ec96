//! Driver operations behind the CLI subcommands.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

/// Network sweep for terminals.
pub mod scan;
/// Directory probing.
pub mod search;
/// Protocol dispatch for downloads and uploads.
pub mod transfer;
