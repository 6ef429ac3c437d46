//! Server-side argument validation.
//!
//! After module selection the client sends the argument vector it would pass
//! to a remote rsync server. Only the sender-relevant subset is honored; a
//! further set of receiver-side niceties is accepted and ignored so stock
//! clients work out of the box, and everything else is rejected by naming
//! the offending tokens back to the client.

use crate::ProtocolError;

/// Hard cap on argument tokens per request.
pub const MAX_ARGUMENTS: usize = 30;
/// Hard cap on the byte length of a single argument token.
pub const MAX_ARGUMENT_LENGTH: usize = 128;

/// The validated result of the client's argument vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub server: bool,
    pub sender: bool,
    pub recurse: bool,
    pub xfer_dirs: bool,
    pub compress: bool,
    pub protect_args: bool,
    pub checksum_seed: Option<i32>,
    /// The capability string the client appended to `-e`.
    pub client_info: String,
    /// The single requested path, as sent (module-name prefixed).
    pub path: String,
}

impl SessionOptions {
    /// True when the client declared incremental-recursion capability.
    pub fn client_can_inc_recurse(&self) -> bool {
        self.client_info.contains('i')
    }

    /// True when the client declared safe file-list support.
    pub fn client_wants_safe_flist(&self) -> bool {
        self.client_info.contains('f')
    }
}

// Long options accepted and ignored; those in the second list carry a value
// after `=` which is ignored along with them.
const IGNORED_LONG: &[&str] = &[
    "verbose", "stats", "copy-links", "copy-unsafe-links", "safe-links", "copy-dirlinks",
    "keep-dirlinks", "links", "ignore-times", "one-file-system", "update", "sparse", "inplace",
    "ignore-errors", "whole-file", "backup", "list-only", "numeric-ids", "times",
];
const IGNORED_LONG_VALUED: &[&str] = &[
    "info", "debug", "modify-window", "block-size", "skip-compress", "compress-level",
    "backup-dir", "suffix", "timeout", "iconv",
];
const IGNORED_SHORT: &[char] = &['v', 't', 'l', 'L', 'k', 'K', 'I', 'x', 'u', 'S', 'W', 'b', 'B'];

/// Validates the argument vector into [`SessionOptions`].
///
/// Rejection is collective: every unrecognized token is gathered first so
/// the client sees the full list in one error. The first positional is the
/// conventional `.` placeholder and is discarded; exactly one path must
/// remain.
pub fn parse(args: &[String]) -> Result<SessionOptions, ProtocolError> {
    let mut options = SessionOptions::default();
    let mut rejected: Vec<&str> = Vec::new();
    let mut positionals: Vec<&str> = Vec::new();
    let mut options_done = false;

    for arg in args {
        if options_done || arg == "-" || !arg.starts_with('-') {
            positionals.push(arg);
        } else if arg == "--" {
            options_done = true;
        } else if let Some(long) = arg.strip_prefix("--") {
            parse_long(long, arg, &mut options, &mut rejected)?;
        } else {
            parse_short_cluster(&arg[1..], arg, &mut options, &mut rejected);
        }
    }

    if !rejected.is_empty() {
        return Err(ProtocolError::UnsupportedOptions(rejected.join(", ")));
    }
    if !options.server || !options.sender {
        return Err(ProtocolError::ReadOnlyModule);
    }
    if options.recurse && !options.client_can_inc_recurse() {
        return Err(ProtocolError::IncrementalRecursionRequired);
    }

    // The leading "." placeholder separates options from paths.
    match positionals.split_first() {
        None | Some((_, [])) => return Err(ProtocolError::NoPathSpecified),
        Some((_, [path])) => options.path = (*path).to_owned(),
        Some((_, [_, _, ..])) => return Err(ProtocolError::MultiplePaths),
    }

    Ok(options)
}

fn parse_long<'a>(
    long: &str,
    token: &'a str,
    options: &mut SessionOptions,
    rejected: &mut Vec<&'a str>,
) -> Result<(), ProtocolError> {
    let (name, value) = match long.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (long, None),
    };
    match name {
        "server" => options.server = true,
        "sender" => options.sender = true,
        "recursive" => options.recurse = true,
        "dirs" => options.xfer_dirs = true,
        "compress" => options.compress = true,
        "protect-args" => options.protect_args = true,
        "rsh" => options.client_info = value.unwrap_or("").to_owned(),
        "checksum-seed" => {
            let value = value.ok_or_else(|| ProtocolError::MissingOptionValue(token.to_owned()))?;
            options.checksum_seed =
                Some(value.parse().map_err(|_| ProtocolError::InvalidChecksumSeed)?);
        }
        _ if IGNORED_LONG.contains(&name) => {}
        _ if IGNORED_LONG_VALUED.contains(&name) => {}
        _ => rejected.push(token),
    }
    Ok(())
}

fn parse_short_cluster<'a>(
    cluster: &str,
    token: &'a str,
    options: &mut SessionOptions,
    rejected: &mut Vec<&'a str>,
) {
    let mut chars = cluster.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            'z' => options.compress = true,
            'r' => options.recurse = true,
            'd' => options.xfer_dirs = true,
            's' => options.protect_args = true,
            'e' => {
                // The rest of the token is the client capability string.
                options.client_info = cluster[at + c.len_utf8()..].to_owned();
                return;
            }
            _ if IGNORED_SHORT.contains(&c) => {}
            _ => {
                rejected.push(token);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|&t| t.to_owned()).collect()
    }

    #[test]
    fn stock_client_vector_is_accepted() {
        let options =
            parse(&args(&["--server", "--sender", "-vltrze.iLsfxC", ".", "repo/ta/"])).unwrap();
        assert!(options.server && options.sender);
        assert!(options.recurse);
        assert!(options.compress);
        assert_eq!(options.client_info, ".iLsfxC");
        assert!(options.client_can_inc_recurse());
        assert!(options.client_wants_safe_flist());
        assert_eq!(options.path, "repo/ta/");
    }

    #[test]
    fn non_recursive_listing_vector_is_accepted() {
        let options = parse(&args(&["--server", "--sender", "-de.i", ".", "repo"])).unwrap();
        assert!(options.xfer_dirs);
        assert!(!options.recurse);
    }

    #[test]
    fn missing_sender_reads_as_an_upload_attempt() {
        let result = parse(&args(&["--server", "-re.i", ".", "repo/"]));
        assert_eq!(result, Err(ProtocolError::ReadOnlyModule));
    }

    #[test]
    fn recursion_needs_the_capability_flag() {
        let result = parse(&args(&["--server", "--sender", "-re.Lsf", ".", "repo/"]));
        assert_eq!(result, Err(ProtocolError::IncrementalRecursionRequired));
    }

    #[test]
    fn unknown_tokens_are_reported_together_verbatim() {
        let result = parse(&args(&[
            "--server", "--sender", "--delete", "-re.i", "--append", ".", "repo/",
        ]));
        assert_eq!(result, Err(ProtocolError::UnsupportedOptions("--delete, --append".into())));
    }

    #[test]
    fn unknown_short_flag_rejects_its_whole_cluster() {
        let result = parse(&args(&["--server", "--sender", "-rPe.i", ".", "repo/"]));
        assert_eq!(result, Err(ProtocolError::UnsupportedOptions("-rPe.i".into())));
    }

    #[test]
    fn ignored_options_change_nothing() {
        let options = parse(&args(&[
            "--server", "--sender", "-vvltIWe.i", "--timeout=60", "--block-size=700",
            "--numeric-ids", ".", "repo/",
        ]))
        .unwrap();
        assert!(!options.recurse && !options.xfer_dirs && !options.compress);
        assert_eq!(options.path, "repo/");
    }

    #[test]
    fn checksum_seed_is_parsed() {
        let options =
            parse(&args(&["--server", "--sender", "--checksum-seed=12345", "-e.i", ".", "repo"]))
                .unwrap();
        assert_eq!(options.checksum_seed, Some(12345));
    }

    #[test]
    fn bad_checksum_seed_is_its_own_error() {
        let result =
            parse(&args(&["--server", "--sender", "--checksum-seed=many", "-e.i", ".", "repo"]));
        assert_eq!(result, Err(ProtocolError::InvalidChecksumSeed));
    }

    #[test]
    fn path_count_must_be_exactly_one() {
        assert_eq!(
            parse(&args(&["--server", "--sender", "-e.i", "."])),
            Err(ProtocolError::NoPathSpecified)
        );
        assert_eq!(
            parse(&args(&["--server", "--sender", "-e.i", ".", "a", "b"])),
            Err(ProtocolError::MultiplePaths)
        );
    }
}
