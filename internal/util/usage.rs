const USAGE: &str = "\
lfsg — Git LFS to S3 access-grant broker

USAGE:
    lfsg [OPTIONS]

OPTIONS:
    -h, --help           Print this help message and exit
    -v, --version        Print version and exit

REQUIRED ENVIRONMENT VARIABLES:
    LFSG_S3_REGION                Object store region
    LFSG_S3_BUCKET                Bucket holding LFS objects
    LFSG_S3_ACCESS_KEY_ID         Object store access key id
    LFSG_S3_SECRET_ACCESS_KEY     Object store secret access key
    LFSG_TOKEN_SECRET             Shared HMAC secret for RemoteAuth tokens

GRANTS:
    LFSG_TOKEN_TTL_SECONDS        RemoteAuth token lifetime      [900]
    LFSG_PRESIGN_TTL_SECONDS      Presigned URL lifetime         [900; max 604800]

NETWORK:
    LFSG_LISTEN                   LFS API listen address         [:8080]
    LFSG_METRICS_LISTEN           Health/metrics listen address  [:9100]
    LFSG_S3_ENDPOINT              Object store endpoint          [https://s3.<region>.amazonaws.com]
    LFSG_PUBLIC_URL               External base URL for broker links
    LFSG_SERVER_PATH              Mount template with :project   [/:project/lfs]
    LFSG_SERVER_SSL               Broker links use https         [false]

OTHER:
    LFSG_LOG_LEVEL                Log level                      [info]
    LFSG_VERBOSE_ERRORS           Echo auth failure reasons      [false]
    LFSG_INSECURE_DEV             Dev mode (true/false)          [false]
";

pub fn print_usage() {
    print!("{USAGE}");
}

pub fn print_version(version: &str) {
    println!("lfsg {version}");
}

fn handle_cli_flags_from_args(args: &[String], version: &str) -> bool {
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return true;
            }
            "-v" | "--version" => {
                print_version(version);
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Check CLI args for --help/-h or --version/-v.
/// Returns `true` if a flag was handled (caller should exit).
pub fn handle_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, version)
}
