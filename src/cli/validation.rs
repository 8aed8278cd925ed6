use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(n) = args.confirmations {
        if n == 0 {
            return Err("invalid confirmations, expected positive integer".to_string());
        }
    }
    if let Some(n) = args.baseline_samples {
        if n == 0 {
            return Err("invalid baseline-samples, expected positive integer".to_string());
        }
    }
    if let Some(n) = args.concurrency {
        if n == 0 {
            return Err("invalid concurrency, expected positive integer".to_string());
        }
    }
    if let Some(raw) = args.reflection_source.as_deref() {
        if crate::observation::ReflectionSource::parse(raw).is_none() {
            return Err(format!(
                "invalid --reflection-source '{raw}', expected request or response"
            ));
        }
    }
    if let Some(raw) = args.method.as_deref() {
        crate::utils::parse_http_method(raw).map_err(|e| format!("invalid --method '{raw}': {e}"))?;
    }
    if let Some(raw) = args.probes.as_deref() {
        let names = crate::utils::parse_csv_list(raw)
            .map_err(|e| format!("invalid --probes '{raw}': {e}"))?;
        crate::probe::catalog::select(&names).map_err(|e| format!("invalid --probes '{raw}': {e}"))?;
    }
    if let Some(raw) = args.params.as_deref() {
        crate::utils::parse_csv_list(raw).map_err(|e| format!("invalid --params '{raw}': {e}"))?;
    }
    if let Some(raw) = args.output_format.as_deref() {
        if crate::output::OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --output-format '{raw}', expected text or json"));
        }
    }
    Ok(())
}
