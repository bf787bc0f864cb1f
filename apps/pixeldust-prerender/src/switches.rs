//! Command line switches understood by the probe.

use pd_browser::PrerenderMode;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_prerender::PrerenderConfig;
use url::Url;

pub const PRERENDER_HTTPS_ALLOWED: &str = "prerender-https-allowed";
pub const PRERENDER_MAX_BYTES: &str = "prerender-max-bytes";
pub const PRERENDER_MAX_CONCURRENCY: &str = "prerender-max-concurrency";
pub const PRERENDER_CONTROL_GROUP: &str = "prerender-control-group";
pub const PRERENDER_MATCH_COMPLETE_GROUP: &str = "prerender-match-complete-group";
pub const USER_AGENT: &str = "user-agent";
pub const NAVIGATE_TO: &str = "navigate-to";

/// Everything the probe was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub config: PrerenderConfig,
    pub mode: PrerenderMode,
    pub urls: Vec<Url>,
    pub navigate_to: Option<Url>,
}

/// Parses `--switch[=value]` arguments and positional URLs.
pub fn parse(args: impl IntoIterator<Item = String>) -> BrowserResult<ProbeOptions> {
    let mut options = ProbeOptions {
        config: PrerenderConfig::default(),
        mode: PrerenderMode::Enabled,
        urls: Vec::new(),
        navigate_to: None,
    };

    for arg in args {
        let Some(switch) = arg.strip_prefix("--") else {
            options.urls.push(parse_url(&arg)?);
            continue;
        };
        let (name, value) = match switch.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (switch, None),
        };

        match name {
            PRERENDER_HTTPS_ALLOWED => {
                options.config.https_allowed = parse_bool(name, value)?;
            }
            PRERENDER_MAX_BYTES => {
                options.config.max_bytes = parse_number(name, value)?;
            }
            PRERENDER_MAX_CONCURRENCY => {
                options.config.max_concurrency = parse_number(name, value)?;
            }
            PRERENDER_CONTROL_GROUP => options.mode = PrerenderMode::ControlGroup,
            PRERENDER_MATCH_COMPLETE_GROUP => options.mode = PrerenderMode::MatchCompleteGroup,
            USER_AGENT => {
                options.config.user_agent_override = required(name, value)?.to_owned();
                options.config.is_overriding_user_agent = true;
            }
            NAVIGATE_TO => options.navigate_to = Some(parse_url(required(name, value)?)?),
            _ => {
                return Err(BrowserError::new(
                    "probe.args.unknown_switch",
                    format!("unknown switch `--{name}`"),
                ));
            }
        }
    }

    options.config.validate()?;
    Ok(options)
}

fn required<'a>(name: &str, value: Option<&'a str>) -> BrowserResult<&'a str> {
    value.filter(|value| !value.is_empty()).ok_or_else(|| {
        BrowserError::new(
            "probe.args.missing_value",
            format!("`--{name}` needs a value (`--{name}=...`)"),
        )
    })
}

fn parse_bool(name: &str, value: Option<&str>) -> BrowserResult<bool> {
    match value {
        None | Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(BrowserError::new(
            "probe.args.invalid_bool",
            format!("`--{name}` expects true or false, got `{other}`"),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&str>) -> BrowserResult<T> {
    let raw = required(name, value)?;
    raw.parse().map_err(|_| {
        BrowserError::new(
            "probe.args.invalid_number",
            format!("`--{name}` expects a number, got `{raw}`"),
        )
    })
}

fn parse_url(raw: &str) -> BrowserResult<Url> {
    Url::parse(raw).map_err(|error| {
        BrowserError::new("probe.args.invalid_url", format!("`{raw}`: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::parse;
    use pd_browser::PrerenderMode;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn defaults_without_switches() {
        let options = parse(args(&["https://a.com/"])).unwrap_or_else(|_| unreachable!());
        assert_eq!(options.mode, PrerenderMode::Enabled);
        assert!(options.config.https_allowed);
        assert_eq!(options.urls.len(), 1);
        assert!(options.navigate_to.is_none());
    }

    #[test]
    fn switches_map_onto_config() {
        let options = parse(args(&[
            "--prerender-https-allowed=false",
            "--prerender-max-bytes=1048576",
            "--prerender-max-concurrency=5",
            "--user-agent=Probe/1.0",
            "--prerender-match-complete-group",
            "--navigate-to=http://b.com/",
            "http://a.com/",
        ]))
        .unwrap_or_else(|_| unreachable!());

        assert!(!options.config.https_allowed);
        assert_eq!(options.config.max_bytes, 1_048_576);
        assert_eq!(options.config.max_concurrency, 5);
        assert_eq!(options.config.user_agent_override, "Probe/1.0");
        assert!(options.config.is_overriding_user_agent);
        assert_eq!(options.mode, PrerenderMode::MatchCompleteGroup);
        assert_eq!(
            options.navigate_to.map(|url| url.to_string()),
            Some("http://b.com/".to_owned())
        );
    }

    #[test]
    fn bare_bool_switch_means_true() {
        let options = parse(args(&["--prerender-https-allowed", "--prerender-control-group"]))
            .unwrap_or_else(|_| unreachable!());
        assert!(options.config.https_allowed);
        assert_eq!(options.mode, PrerenderMode::ControlGroup);
    }

    fn code(raw: &[&str]) -> Result<(), &'static str> {
        parse(args(raw)).map(|_| ()).map_err(|error| error.code)
    }

    #[test]
    fn bad_input_reports_error_codes() {
        assert_eq!(code(&["--bogus"]), Err("probe.args.unknown_switch"));
        assert_eq!(code(&["--user-agent"]), Err("probe.args.missing_value"));
        assert_eq!(
            code(&["--prerender-max-bytes=lots"]),
            Err("probe.args.invalid_number")
        );
        assert_eq!(
            code(&["--prerender-https-allowed=maybe"]),
            Err("probe.args.invalid_bool")
        );
        assert_eq!(code(&["not a url"]), Err("probe.args.invalid_url"));
        assert_eq!(
            code(&["--prerender-max-bytes=0"]),
            Err("prerender.config.max_bytes_invalid")
        );
    }
}
