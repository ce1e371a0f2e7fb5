/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod router;
pub use router::{ServeState, build_router};

mod tls;
pub use tls::{TlsListener, build_tls_config};
