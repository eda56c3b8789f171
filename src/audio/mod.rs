// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio primitives: PCM16 helpers and the speech probability source.

pub mod probability;
pub mod utils;
