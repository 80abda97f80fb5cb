// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource-quota plan parsing.
//!
//! A plan token is either one of the named plans (`default`, `4C1G`, `4C2G`,
//! `4C4G`) or a free-form `<n>C<m>G` token where `n` and `m` may carry a
//! fractional part (`2.5C3G`). Parsing is pure: no state, no I/O.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Plan token used when a process declares none.
pub const DEFAULT_PLAN: &str = "default";

/// CPU request applied to every plan, in millicores.
const CPU_REQUEST_MILLIS: i64 = 200;

/// Memory threshold above which the request is half the limit instead of a
/// quarter, in Mi.
const MEM_HALF_THRESHOLD_MIB: i64 = 2048;

/// A CPU/memory pair, in millicores and Mi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    /// CPU in millicores (`2000` renders as `2000m`).
    pub cpu_millis: i64,
    /// Memory in mebibytes (`4096` renders as `4096Mi`).
    pub memory_mib: i64,
}

impl ResourceQuantity {
    /// Kubernetes quantity string for the CPU value, e.g. `2000m`.
    pub fn cpu(&self) -> String {
        format!("{}m", self.cpu_millis)
    }

    /// Kubernetes quantity string for the memory value, e.g. `4096Mi`.
    pub fn memory(&self) -> String {
        format!("{}Mi", self.memory_mib)
    }
}

/// A parsed resource-quota plan: the limit pair plus the derived request pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPlan {
    /// Resource limits.
    pub limits: ResourceQuantity,
    /// Resource requests derived from the limits.
    pub requests: ResourceQuantity,
}

impl QuotaPlan {
    fn from_limits(cpu_millis: i64, memory_mib: i64) -> Self {
        let mem_request = if memory_mib >= MEM_HALF_THRESHOLD_MIB {
            memory_mib / 2
        } else {
            memory_mib / 4
        };
        Self {
            limits: ResourceQuantity {
                cpu_millis,
                memory_mib,
            },
            requests: ResourceQuantity {
                cpu_millis: CPU_REQUEST_MILLIS,
                memory_mib: mem_request,
            },
        }
    }
}

/// Parse a plan token into its limit/request pairs.
///
/// # Errors
///
/// Returns [`ModelError::QuotaPlan`] when the token is neither a named plan
/// nor a well-formed `<n>C<m>G` token.
pub fn parse(token: &str) -> Result<QuotaPlan> {
    match token {
        // `default` is the smallest named plan.
        DEFAULT_PLAN | "4C1G" => Ok(QuotaPlan::from_limits(4000, 1024)),
        "4C2G" => Ok(QuotaPlan::from_limits(4000, 2048)),
        "4C4G" => Ok(QuotaPlan::from_limits(4000, 4096)),
        other => parse_formula(other),
    }
}

/// Parse a `<n>C<m>G` token, case-insensitive, fractional parts allowed.
fn parse_formula(token: &str) -> Result<QuotaPlan> {
    let invalid = || ModelError::QuotaPlan(token.to_string());

    let upper = token.to_ascii_uppercase();
    let rest = upper.strip_suffix('G').ok_or_else(invalid)?;
    let (cpu_part, mem_part) = rest.split_once('C').ok_or_else(invalid)?;

    let cpu: f64 = parse_decimal(cpu_part).ok_or_else(invalid)?;
    let mem: f64 = parse_decimal(mem_part).ok_or_else(invalid)?;

    let cpu_millis = (cpu * 1000.0).round() as i64;
    let memory_mib = (mem * 1024.0).round() as i64;
    if cpu_millis <= 0 || memory_mib <= 0 {
        return Err(invalid());
    }

    Ok(QuotaPlan::from_limits(cpu_millis, memory_mib))
}

/// Parse `\d+(\.\d+)?` - stricter than `str::parse::<f64>`, which would also
/// accept exponents, signs and `inf`.
fn parse_decimal(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = frac_part
        && (frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    s.parse().ok()
}
