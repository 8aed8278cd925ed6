use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "backslash",
    version,
    about = "differential fingerprinting scanner for server-side injection",
    long_about = "backslash sends pairs of payloads that should break and should not break a backend's parser, and reports parameters where the two classes of response stay different after repeated confirmation.\n\nExamples:\n  backslash -u 'https://target.tld/search?q=shoes'\n  backslash -u 'https://target.tld/item?id=1' --probes numeric-division\n  backslash -i targets.txt --wordlist params.txt -o findings.json\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "vb",
        visible_alias = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase verbosity (-v, -vv)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'c',
        long = "clr",
        visible_alias = "color",
        help_heading = "Output",
        help = "Enable colored output (overrides --no-color)."
    )]
    pub color: bool,

    #[arg(
        short = 'n',
        long = "nc",
        visible_alias = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write findings to a file."
    )]
    pub output: Option<String>,

    #[arg(
        short = 'A',
        long = "of",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Output format (text or json)."
    )]
    pub output_format: Option<String>,

    #[arg(
        short = 'u',
        long = "u",
        visible_alias = "url",
        value_name = "URL",
        action = ArgAction::Append,
        help_heading = "Input",
        help = "Target URL with the parameters to test (repeatable)."
    )]
    pub url: Vec<String>,

    #[arg(
        short = 'i',
        long = "if",
        visible_alias = "input-file",
        value_name = "FILE",
        help_heading = "Input",
        help = "Load target URLs from a file (one per line)."
    )]
    pub input_file: Option<String>,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.backslash/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        short = 'K',
        long = "wl",
        visible_alias = "wordlist",
        value_name = "FILE",
        help_heading = "Input",
        help = "Candidate backend parameter names (one per line). Enables parameter discovery."
    )]
    pub wordlist: Option<String>,

    #[arg(
        short = 'P',
        long = "prm",
        visible_alias = "params",
        value_name = "NAMES",
        help_heading = "Scan",
        help = "Only test these parameters (comma-separated). Missing ones are added to the query."
    )]
    pub params: Option<String>,

    #[arg(
        short = 'x',
        long = "prb",
        visible_alias = "probes",
        value_name = "NAMES",
        help_heading = "Scan",
        help = "Probes to run (comma-separated, default: all)."
    )]
    pub probes: Option<String>,

    #[arg(
        long = "lp",
        visible_alias = "list-probes",
        help_heading = "Scan",
        help = "List the available probes and exit."
    )]
    pub list_probes: bool,

    #[arg(
        short = 'k',
        long = "cf",
        visible_alias = "confirmations",
        value_name = "N",
        help_heading = "Scan",
        help = "Interleaved confirmation rounds before a difference is reported."
    )]
    pub confirmations: Option<usize>,

    #[arg(
        short = 'b',
        long = "bs",
        visible_alias = "baseline-samples",
        value_name = "N",
        help_heading = "Scan",
        help = "Samples merged into each parameter's baseline."
    )]
    pub baseline_samples: Option<usize>,

    #[arg(
        short = 'R',
        long = "rs",
        visible_alias = "reflection-source",
        value_name = "SOURCE",
        help_heading = "Scan",
        help = "Where to count anchor reflections (request or response)."
    )]
    pub reflection_source: Option<String>,

    #[arg(
        short = 'r',
        long = "rt",
        visible_alias = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Request rate limit (requests per second)."
    )]
    pub rate: Option<u32>,

    #[arg(
        short = 't',
        long = "cnc",
        visible_alias = "concurrency",
        value_name = "N",
        help_heading = "Performance",
        help = "Parameters evaluated concurrently."
    )]
    pub concurrency: Option<u32>,

    #[arg(
        short = 'w',
        long = "wrk",
        visible_alias = "workers",
        value_name = "N",
        help_heading = "Performance",
        help = "Number of runtime worker threads."
    )]
    pub workers: Option<usize>,

    #[arg(
        short = 'p',
        long = "px",
        visible_alias = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "HTTP proxy URL (e.g. http://127.0.0.1:8080)."
    )]
    pub proxy: Option<String>,

    #[arg(
        short = 'F',
        long = "frd",
        visible_alias = "follow-redirects",
        help_heading = "HTTP",
        help = "Follow HTTP redirects."
    )]
    pub follow_redirects: bool,

    #[arg(
        short = 'T',
        long = "to",
        visible_alias = "timeout",
        value_name = "SECONDS",
        help_heading = "HTTP",
        help = "Per-request timeout in seconds."
    )]
    pub timeout: Option<usize>,

    #[arg(
        short = 'H',
        long = "hdr",
        visible_alias = "header",
        value_name = "HEADER",
        help_heading = "HTTP",
        help = "Add a header to all requests (format: 'Key: Value')."
    )]
    pub header: Option<String>,

    #[arg(
        short = 'm',
        long = "mth",
        visible_alias = "method",
        value_name = "METHOD",
        help_heading = "HTTP",
        help = "HTTP method to send (default: GET)."
    )]
    pub method: Option<String>,

    #[arg(
        short = 'd',
        long = "dt",
        visible_alias = "data",
        value_name = "BODY",
        help_heading = "HTTP",
        help = "Urlencoded form body; its parameters are tested too."
    )]
    pub body: Option<String>,
}
