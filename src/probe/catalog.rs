use super::{Placement, Probe, ProbeError};

pub const PROBE_NAMES: &[&str] = &[
    "backslash",
    "apostrophe",
    "double-quote",
    "interpolation-dollar",
    "interpolation-curly",
    "numeric-division",
];

pub fn probe(name: &str) -> Result<Probe, ProbeError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "backslash" => Probe::builder("backslash")
            .breaks(["\\"])
            .escapes(["\\\\"])
            .build(),
        "apostrophe" => Probe::builder("apostrophe")
            .breaks(["z'z", "\\zz'z"])
            .escapes(["z\\'z", "z''z"])
            .build(),
        "double-quote" => Probe::builder("double-quote")
            .breaks(["z\"z", "\\zz\"z"])
            .escapes(["z\\\"z", "z\"\"z"])
            .build(),
        "interpolation-dollar" => Probe::builder("interpolation-dollar")
            .breaks(["${{z", "z${{z"])
            .escapes(["$}}", "}}$z"])
            .build(),
        "interpolation-curly" => Probe::builder("interpolation-curly")
            .breaks(["{{z", "z{{z"])
            .escapes(["z}}", "}}z"])
            .build(),
        "numeric-division" => Probe::builder("numeric-division")
            .breaks(["1/0", "2/0"])
            .escapes(["1/1", "2/2"])
            .placement(Placement::Replace)
            .random_anchor(false)
            .require_consistent_evidence(true)
            .build(),
        _ => Err(ProbeError::UnknownProbe {
            name: name.to_string(),
        }),
    }
}

pub fn all() -> Result<Vec<Probe>, ProbeError> {
    PROBE_NAMES.iter().map(|name| probe(name)).collect()
}

/// The named subset, in the order given. An empty selection means every probe.
pub fn select(names: &[String]) -> Result<Vec<Probe>, ProbeError> {
    if names.is_empty() {
        return all();
    }
    names.iter().map(|name| probe(name)).collect()
}
