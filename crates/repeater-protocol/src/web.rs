//! Web configuration page.
//!
//! A `GET /?key=value&...` request is a batch of console commands. The
//! page itself only reflects state; all changes go through the interpreter.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::console::MAX_LINE;

/// Query parameters of one page request, as command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebRequest {
    pub commands: Vec<String>,
    /// Lock the configuration after the commands ran.
    pub lock: bool,
    /// Restart once the page has been served.
    pub reset: bool,
    /// Re-open the telemetry session.
    pub reconnect: bool,
}

impl WebRequest {
    /// Map decoded query pairs onto commands. Unknown keys and empty values
    /// are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut req = WebRequest::default();
        for (key, value) in pairs {
            let Some(value) = value.split_whitespace().next() else {
                continue;
            };
            match key {
                "ssid" | "password" | "ap_ssid" | "ap_password" | "network" | "mqtt_host"
                | "mqtt_port" => req.push(format!("set {key} {value}")),
                "ap_open" => match value {
                    "open" => req.push("set ap_open 1".to_string()),
                    "wpa2" => req.push("set ap_open 0".to_string()),
                    _ => {}
                },
                "unlock_password" => req.push(format!("unlock {value}")),
                "lock" => req.lock = true,
                "reset" => req.reset = true,
                "doreconnect" => req.reconnect = true,
                _ => {}
            }
        }
        req
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && !self.lock && !self.reset && !self.reconnect
    }

    fn push(&mut self, mut line: String) {
        if line.len() > MAX_LINE {
            let mut end = MAX_LINE;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        self.commands.push(line);
    }
}

/// Quote `s` so the console tokenizer reads it back as a single token.
pub fn escape_token(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c <= ' ' || c == '%' || c == '\\' {
            let _ = write!(out, "%{:02X}", c as u32);
        } else {
            out.push(c);
        }
    }
    out
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Current settings shown on the configuration page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageValues {
    pub ssid: String,
    pub password: String,
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_open: bool,
    pub network: Ipv4Addr,
    /// Present when the telemetry client is built in.
    pub telemetry: Option<TelemetryValues>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryValues {
    pub connected: bool,
    pub host: String,
    pub port: u16,
}

const HEAD: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset='utf-8'/>\n\
<meta name='viewport' content='width=device-width, initial-scale=1.0'/>\n";

fn text_row(out: &mut String, label: &str, name: &str, value: &str) {
    let _ = writeln!(
        out,
        "<tr><td>{label}:</td><td><input type='text' name='{name}' value='{}'/></td></tr>",
        html_escape(value)
    );
}

fn submit_row(out: &mut String, label: &str) {
    let _ = writeln!(
        out,
        "<tr><td></td><td><input type='submit' value='{label}'/></td></tr>"
    );
}

pub fn config_page(values: &PageValues) -> String {
    let mut out = String::from(HEAD);
    out.push_str("<title>Config</title>\n</head>\n<body>\n<h1>Config</h1>\n");

    out.push_str("<h2>STA Settings</h2>\n<form>\n<table>\n");
    text_row(&mut out, "SSID", "ssid", &values.ssid);
    text_row(&mut out, "Password", "password", &values.password);
    submit_row(&mut out, "Connect");
    out.push_str("</table>\n</form>\n");

    out.push_str("<h2>AP Settings</h2>\n<form>\n<table>\n");
    text_row(&mut out, "SSID", "ap_ssid", &values.ap_ssid);
    text_row(&mut out, "Password", "ap_password", &values.ap_password);
    let (open, wpa2) = if values.ap_open {
        (" selected", "")
    } else {
        ("", " selected")
    };
    let _ = writeln!(
        out,
        "<tr><td>Security:</td><td><select name='ap_open'>\
<option value='open'{open}>Open</option><option value='wpa2'{wpa2}>WPA2</option>\
</select></td></tr>"
    );
    text_row(&mut out, "Subnet", "network", &values.network.to_string());
    submit_row(&mut out, "Set");
    out.push_str("</table>\n<small><i>Password: </i>min. 8 chars</small>\n</form>\n");

    if let Some(t) = &values.telemetry {
        out.push_str("<h2>MQTT Config</h2>\n<form>\n<table>\n");
        let _ = writeln!(
            out,
            "<tr><td>MQTT status:</td><td>{}</td></tr>",
            if t.connected { "Connected" } else { "Not connected" }
        );
        text_row(&mut out, "MQTT host", "mqtt_host", &t.host);
        text_row(&mut out, "MQTT port", "mqtt_port", &t.port.to_string());
        submit_row(&mut out, "Set");
        out.push_str("</table>\n</form>\n");
        out.push_str(
            "<form><input type='submit' name='doreconnect' value='Reconnect MQTT'/></form>\n",
        );
    }

    out.push_str(
        "<h2>Lock Config</h2>\n<form>\n<table>\n\
<tr><td>Lock Device:</td><td><input type='checkbox' name='lock' value='l'/></td></tr>\n\
<tr><td></td><td><input type='submit' name='dolock' value='Lock'/></td></tr>\n\
</table>\n</form>\n",
    );
    out.push_str(
        "<h2>Device Management</h2>\n<form>\n\
<input type='submit' name='reset' value='Restart'/>\n</form>\n",
    );
    out.push_str("</body>\n</html>\n");
    out
}

pub fn unlock_page() -> String {
    let mut out = String::from(HEAD);
    out.push_str(
        "<title>Locked</title>\n</head>\n<body>\n<h1>Config</h1>\n\
<h2>Config Locked</h2>\n<form autocomplete='off' method='GET'>\n<table>\n\
<tr><td>Password:</td><td><input type='password' name='unlock_password'/></td></tr>\n",
    );
    submit_row(&mut out, "Unlock");
    out.push_str(
        "</table>\n<small><i>Default: STA password to unlock</i></small>\n</form>\n\
</body>\n</html>\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_maps_to_commands() {
        let req = WebRequest::from_pairs([
            ("ssid", "home%20net"),
            ("password", "secret trailing"),
            ("ap_open", "wpa2"),
            ("network", "10.24.0.0"),
            ("bogus", "1"),
            ("ap_ssid", ""),
        ]);
        assert_eq!(
            req.commands,
            vec![
                "set ssid home%20net",
                "set password secret",
                "set ap_open 0",
                "set network 10.24.0.0",
            ]
        );
        assert!(!req.lock && !req.reset && !req.reconnect);
    }

    #[test]
    fn test_flags() {
        let req = WebRequest::from_pairs([
            ("lock", "l"),
            ("dolock", "Lock"),
            ("reset", "Restart"),
            ("doreconnect", "Reconnect"),
        ]);
        assert!(req.commands.is_empty());
        assert!(req.lock && req.reset && req.reconnect);
        assert!(WebRequest::from_pairs([]).is_empty());
    }

    #[test]
    fn test_unlock_password() {
        let req = WebRequest::from_pairs([("unlock_password", "pw1")]);
        assert_eq!(req.commands, vec!["unlock pw1"]);
    }

    #[test]
    fn test_long_values_are_truncated_to_a_console_line() {
        let long = "x".repeat(200);
        let req = WebRequest::from_pairs([("ssid", long.as_str())]);
        assert_eq!(req.commands[0].len(), MAX_LINE);
        assert!(req.commands[0].starts_with("set ssid xxx"));
    }

    #[test]
    fn test_escape_token() {
        assert_eq!(escape_token("my pass%1\\"), "my%20pass%251%5C");
        assert_eq!(escape_token("plain"), "plain");
        assert_eq!(escape_token("grüße du"), "grüße%20du");
    }

    #[test]
    fn test_config_page_reflects_values() {
        let page = config_page(&PageValues {
            ssid: "home<net>".into(),
            password: "pw".into(),
            ap_ssid: "Den Trai Tim".into(),
            ap_password: "12345678".into(),
            ap_open: true,
            network: Ipv4Addr::new(192, 168, 4, 0),
            telemetry: None,
        });
        assert!(page.contains("value='home&lt;net&gt;'"));
        assert!(page.contains("<option value='open' selected>"));
        assert!(page.contains("value='192.168.4.0'"));
        assert!(!page.contains("MQTT"));
    }

    #[test]
    fn test_config_page_with_telemetry() {
        let page = config_page(&PageValues {
            ssid: String::new(),
            password: String::new(),
            ap_ssid: String::new(),
            ap_password: String::new(),
            ap_open: false,
            network: Ipv4Addr::new(10, 0, 0, 0),
            telemetry: Some(TelemetryValues {
                connected: false,
                host: "broker".into(),
                port: 1883,
            }),
        });
        assert!(page.contains("<td>Not connected</td>"));
        assert!(page.contains("name='mqtt_port' value='1883'"));
        assert!(page.contains("<option value='wpa2' selected>"));
    }

    #[test]
    fn test_unlock_page_has_only_the_unlock_form() {
        let page = unlock_page();
        assert!(page.contains("name='unlock_password'"));
        assert!(!page.contains("name='ssid'"));
    }
}
