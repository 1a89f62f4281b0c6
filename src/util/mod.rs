// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Common utility functions.

mod keypath;

pub use keypath::{get_float_at_path, safekey};
