//! Kubernetes resource quantity parsing

/// Parse a CPU quantity (`250m`, `1.5`, `120000n`) into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<f64> {
    let q = quantity.trim();
    let (number, scale) = if let Some(n) = q.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(n) = q.strip_suffix('u') {
        (n, 1e-3)
    } else if let Some(n) = q.strip_suffix('m') {
        (n, 1.0)
    } else {
        (q, 1000.0)
    };
    number.parse::<f64>().ok().map(|v| v * scale)
}

/// Parse a memory quantity (`128Mi`, `1G`, `1048576`) into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<f64> {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
    ];
    const DECIMAL: [(&str, f64); 7] = [
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let q = quantity.trim();
    for (suffix, factor) in BINARY.iter().chain(DECIMAL.iter()) {
        if let Some(number) = q.strip_suffix(suffix) {
            if let Ok(value) = number.parse::<f64>() {
                return Some(value * factor);
            }
        }
    }
    q.parse::<f64>().ok()
}
