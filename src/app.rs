use std::collections::HashMap;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::observation::ReflectionSource;
use crate::output::{self, OutputFormat};
use crate::probe::catalog;
use crate::runner::{Finding, FindingKind, Options, Runner, WordlistSource};

fn print_banner(no_color: bool) {
    const BANNER: &str = r#"
    __               __        __           __
   / /_  ____ ______/ /_______/ /___ ______/ /_
  / __ \/ __ `/ ___/ //_/ ___/ / __ `/ ___/ __ \
 / /_/ / /_/ / /__/ ,< (__  ) / /_/ (__  ) / / /
/_.___/\__,_/\___/_/|_/____/_/\__,_/____/_/ /_/
"#;
    print!("{}", BANNER);
    let tagline = format!(
        "       v{} - differential injection scanner",
        env!("CARGO_PKG_VERSION")
    );
    if no_color {
        println!("{tagline}");
    } else {
        println!("{}", tagline.bold());
    }
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<12}: {}", label, value);
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    out.push_str(cmd.get_name());
    if let Some(version) = cmd.get_version() {
        out.push(' ');
        out.push_str(version);
    }
    out.push('\n');

    if let Some(about) = cmd.get_about() {
        out.push_str(&about.to_string());
        out.push('\n');
    }

    if let Some(long_about) = cmd.get_long_about() {
        out.push('\n');
        out.push_str(&long_about.to_string());
        out.push('\n');
    }

    out.push('\n');
    out.push_str("Usage: ");
    out.push_str(cmd.get_name());
    out.push_str(" [OPTIONS]\n\n");

    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    let mut section_idx: HashMap<String, usize> = HashMap::new();

    for arg in cmd.get_arguments() {
        if arg.is_hide_set() {
            continue;
        }
        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        let idx = match section_idx.get(&heading).copied() {
            Some(i) => i,
            None => {
                sections.push((heading.clone(), Vec::new()));
                let i = sections.len() - 1;
                section_idx.insert(heading, i);
                i
            }
        };
        sections[idx].1.push(arg);
    }

    for (heading, args) in sections {
        out.push_str(&heading);
        out.push_str(":\n");

        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            if let Some(aliases) = arg.get_visible_aliases() {
                for alias in aliases {
                    let rendered = format!("--{alias}");
                    if !parts.iter().any(|p| p == &rendered) {
                        parts.push(rendered);
                    }
                }
            }

            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                flags.push_str(&format!(" <{value_name}>"));
            }

            out.push_str("  ");
            out.push_str(&flags);
            out.push('\n');

            if let Some(help) = arg.get_help() {
                let help = help.to_string();
                if !help.trim().is_empty() {
                    out.push_str("          ");
                    out.push_str(help.trim());
                    out.push('\n');
                }
            }
            out.push('\n');
        }
    }

    out
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[derive(Clone, Debug)]
struct RunConfig {
    options: Options,
    workers: usize,
    verbose: u8,
    output: Option<String>,
    output_format: OutputFormat,
    no_color: bool,
    list_probes: bool,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = if args.color {
        false
    } else {
        args.no_color || cfg.no_color.unwrap_or(false)
    };

    let rate = args.rate.or(cfg.rate).unwrap_or(50);
    let concurrency = args.concurrency.or(cfg.concurrency).unwrap_or(4);
    let timeout = args.timeout.or(cfg.timeout).unwrap_or(10);
    let workers = args.workers.or(cfg.workers).unwrap_or(4);
    let follow_redirects = args.follow_redirects || cfg.follow_redirects.unwrap_or(false);

    let confirmations = args
        .confirmations
        .or(cfg.confirmations)
        .unwrap_or(crate::injector::CONFIRMATIONS);
    if confirmations == 0 {
        return Err("invalid confirmations, expected positive integer".to_string());
    }
    let baseline_samples = args.baseline_samples.or(cfg.baseline_samples).unwrap_or(4);
    if baseline_samples == 0 {
        return Err("invalid baseline-samples, expected positive integer".to_string());
    }

    let reflection_raw = args
        .reflection_source
        .or(cfg.reflection_source)
        .unwrap_or_else(|| "request".to_string());
    let reflection_source = ReflectionSource::parse(&reflection_raw).ok_or_else(|| {
        format!("invalid reflection source '{reflection_raw}', expected request or response")
    })?;

    let method_raw = args
        .method
        .or(cfg.method)
        .unwrap_or_else(|| "GET".to_string());
    let method = crate::utils::parse_http_method(&method_raw)
        .map_err(|e| format!("invalid method '{method_raw}': {e}"))?;

    let probes = match args.probes.or(cfg.probes) {
        Some(raw) => crate::utils::parse_csv_list(&raw)
            .map_err(|e| format!("invalid probes '{raw}': {e}"))?,
        None => Vec::new(),
    };
    let params = match args.params.or(cfg.params) {
        Some(raw) => crate::utils::parse_csv_list(&raw)
            .map_err(|e| format!("invalid params '{raw}': {e}"))?,
        None => Vec::new(),
    };

    let output_path = args
        .output
        .or(cfg.output)
        .map(|p| config::expand_tilde_string(&p));
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => OutputFormat::parse(&raw)
            .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        None => output_path
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or(OutputFormat::Text),
    };

    let mut urls: Vec<String> = args.url.iter().map(|u| u.trim().to_string()).collect();
    if urls.is_empty() {
        urls = cfg.urls.unwrap_or_default();
    }
    let input_file = args
        .input_file
        .or(cfg.input_file)
        .map(|p| config::expand_tilde_string(&p));
    let wordlist = args
        .wordlist
        .or(cfg.wordlist)
        .map(|p| WordlistSource::FilePath(config::expand_tilde_string(&p)));

    let options = Options {
        urls,
        input_file,
        method,
        body: args.body.or(cfg.body).filter(|b| !b.trim().is_empty()),
        params,
        probes,
        wordlist,
        rate,
        concurrency,
        timeout_seconds: timeout,
        proxy: args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty()),
        follow_redirects,
        header: args.header.or(cfg.header).filter(|h| !h.trim().is_empty()),
        confirmations,
        baseline_samples,
        reflection_source,
    };

    Ok(RunConfig {
        options,
        workers,
        verbose: args.verbose,
        output: output_path,
        output_format,
        no_color,
        list_probes: args.list_probes,
    })
}

fn init_tracing(verbose: u8, no_color: bool) {
    let default_level = match verbose {
        0 => "backslash=warn",
        1 => "backslash=debug",
        _ => "backslash=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_settings(run: &RunConfig) {
    let opts = &run.options;
    let probes = if opts.probes.is_empty() {
        catalog::PROBE_NAMES.join(",")
    } else {
        opts.probes.join(",")
    };
    if !opts.urls.is_empty() {
        format_kv_line("Targets", &opts.urls.join(", "));
    }
    if let Some(path) = opts.input_file.as_deref() {
        format_kv_line("Input file", path);
    }
    format_kv_line("Method", opts.method.as_str());
    format_kv_line("Probes", &probes);
    if !opts.params.is_empty() {
        format_kv_line("Params", &opts.params.join(","));
    }
    format_kv_line("Confirm", &opts.confirmations.to_string());
    format_kv_line("Baseline", &opts.baseline_samples.to_string());
    format_kv_line(
        "Reflections",
        match opts.reflection_source {
            ReflectionSource::Request => "request",
            ReflectionSource::Response => "response",
        },
    );
    format_kv_line("Rate", &opts.rate.to_string());
    format_kv_line("Concurrency", &opts.concurrency.to_string());
    format_kv_line("Timeout", &format!("{}s", opts.timeout_seconds));
    format_kv_line("Redirects", format_bool(opts.follow_redirects));
    if let Some(proxy) = opts.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    if let Some(WordlistSource::FilePath(path)) = opts.wordlist.as_ref() {
        format_kv_line("Wordlist", path);
    }
    if let Some(path) = run.output.as_deref() {
        format_kv_line("Output", path);
    }
    println!();
}

fn format_finding(finding: &Finding) -> String {
    let tag = match finding.kind {
        FindingKind::Injection => "[injection]".red().bold(),
        FindingKind::BackendParameter => "[backend-param]".yellow().bold(),
    };
    let diffs: Vec<String> = finding
        .differences
        .iter()
        .map(|d| format!("{}: {} vs {}", d.attribute, d.break_value, d.no_break_value))
        .collect();
    format!(
        "{} {} {} {} {} {}\n    break {:?} / escape {:?}\n    {}",
        tag,
        finding.method,
        finding.url.cyan(),
        finding.param.bold(),
        "via".dimmed(),
        finding.probe.green(),
        finding.break_payload,
        finding.escape_payload,
        diffs.join(", ")
    )
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    print_banner(run.no_color);

    if run.list_probes {
        for name in catalog::PROBE_NAMES.iter() {
            println!("{name}");
        }
        return Ok(());
    }

    print_settings(&run);
    let runner = Runner::new(run.options.clone()).map_err(|e| e.to_string())?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current round");
            ctrl_c.cancel();
        }
    });

    let pb = ProgressBar::new(1);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );

    let result = runner
        .run_with_progress(cancel, Some(pb.clone()))
        .await
        .map_err(|e| e.to_string())?;
    pb.finish_and_clear();

    for finding in result.findings.iter() {
        println!("{}", format_finding(finding));
    }

    if let Some(path) = run.output.as_deref() {
        output::write_report(path, run.output_format, &result.findings)
            .await
            .map_err(|e| format!("failed to write output '{path}': {e}"))?;
    }

    println!();
    println!(
        ":: Completed :: {} parameters, {} findings, {} errors in {}s{} ::",
        result.points_tested,
        result.findings.len(),
        result.errors,
        result.elapsed.as_secs(),
        if result.cancelled { " (cancelled)" } else { "" }
    );

    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let cfg = match args.config.clone().map(|p| config::expand_tilde(&p)) {
        Some(path) => config::load_config(&path, false)?,
        None => match config::default_config_path() {
            Some(path) => {
                if let Err(e) = config::ensure_default_config_file(&path) {
                    eprintln!(":: config: {e}");
                }
                config::load_config(&path, true)?
            }
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    init_tracing(run.verbose, run.no_color);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(run.workers.max(1))
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))?;
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_apply_without_config() {
        let args = CliArgs::parse_from(["backslash", "-u", "http://example.com/?q=1"]);
        let run = build_run_config(args, ConfigFile::default()).unwrap();
        assert_eq!(run.options.confirmations, 8);
        assert_eq!(run.options.baseline_samples, 4);
        assert_eq!(run.options.reflection_source, ReflectionSource::Request);
        assert_eq!(run.options.method, reqwest::Method::GET);
        assert!(run.options.probes.is_empty());
        assert_eq!(run.output_format, OutputFormat::Text);
    }

    #[test]
    fn cli_overrides_config() {
        let args = CliArgs::parse_from([
            "backslash",
            "-u",
            "http://example.com/?q=1",
            "--confirmations",
            "3",
            "--probes",
            "backslash,apostrophe",
        ]);
        let cfg = ConfigFile {
            confirmations: Some(12),
            baseline_samples: Some(2),
            ..Default::default()
        };
        let run = build_run_config(args, cfg).unwrap();
        assert_eq!(run.options.confirmations, 3);
        assert_eq!(run.options.baseline_samples, 2);
        assert_eq!(
            run.options.probes,
            vec!["backslash".to_string(), "apostrophe".to_string()]
        );
    }

    #[test]
    fn output_format_is_inferred_from_path() {
        let args = CliArgs::parse_from([
            "backslash",
            "-u",
            "http://example.com/?q=1",
            "-o",
            "/tmp/findings.json",
        ]);
        let run = build_run_config(args, ConfigFile::default()).unwrap();
        assert_eq!(run.output_format, OutputFormat::Json);
    }

    #[test]
    fn unknown_probe_is_rejected() {
        let args = CliArgs::parse_from([
            "backslash",
            "-u",
            "http://example.com/?q=1",
            "--probes",
            "sqli",
        ]);
        assert!(build_run_config(args, ConfigFile::default()).is_err());
    }

    #[test]
    fn config_reflection_source_is_validated() {
        let args = CliArgs::parse_from(["backslash", "-u", "http://example.com/?q=1"]);
        let cfg = ConfigFile {
            reflection_source: Some("headers".to_string()),
            ..Default::default()
        };
        assert!(build_run_config(args, cfg).is_err());
    }
}
