// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control group management for containers, speaking the cgroup v1
//! filesystem interface directly.

mod resources;
mod v1fs;

pub use resources::*;
pub use v1fs::*;
