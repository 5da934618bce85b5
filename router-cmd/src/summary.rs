use std::io::{stdout, Write};

use anyhow::{Context, Result};
use ccsds_router::{RouteConfig, RunSummary};
use handlebars::handlebars_helper;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    source: String,
    sink: String,
    timing: &'static str,
    dropped: u64,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

pub fn report(config: &RouteConfig, summary: &RunSummary, format: &Format) -> Result<()> {
    let report = Report {
        source: config.source.to_string(),
        sink: config.sink.to_string(),
        timing: config.timing.name(),
        dropped: summary.stats.dropped(),
        summary,
    };

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &report).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&report).context("serializing summary")?;
            stdout()
                .write_all(data.as_bytes())
                .context("writing to stdout")
        }
    }
}

fn render_text(report: &Report) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>width$}")
    });
    handlebars_helper!(secs: |v: f64| format!("{v:.3}"));

    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_helper("secs", Box::new(secs));
    hb.register_template_string("summary", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("summary", report).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ source }} -> {{ sink }} ({{ timing }})
===============================================================================
Elapsed:    {{ secs elapsed_secs }}s
Read:       {{ stats.bytes_read }} bytes
Written:    {{ stats.bytes_written }} bytes
Decoded:    {{ stats.decoded }}
Accepted:   {{ stats.accepted }}
Emitted:    {{ stats.emitted }}
Dropped:    {{ dropped }} (oversized {{ stats.dropped_oversized }}, apid {{ stats.dropped_apid }}, malformed {{ stats.dropped_malformed }}, incomplete {{ stats.dropped_incomplete }})
Resyncs:    {{ stats.resyncs }} ({{ stats.bytes_skipped }} bytes skipped)
Connections: {{ stats.connections }}
-------------------------------------------------------------------------------
  APID     Packets           Bytes   Missing   Last Seq
-------------------------------------------------------------------------------
{{ #each stats.apids }}{{ lpad 6 @key }}  {{ lpad 10 packets }}  {{ lpad 14 bytes }}  {{ lpad 8 missing }}  {{ lpad 9 last_sequence }}
{{/each }}";

#[cfg(test)]
mod tests {
    use super::*;
    use ccsds_router::{EndpointConfig, RunStats};
    use std::time::Duration;

    #[test]
    fn test_render_text() {
        let config = RouteConfig::builder()
            .source(EndpointConfig::File {
                path: "in.dat".into(),
            })
            .sink(EndpointConfig::Udp {
                address: "127.0.0.1:9000".into(),
            })
            .build();
        let mut stats = RunStats {
            emitted: 2,
            dropped_apid: 1,
            ..RunStats::default()
        };
        stats.apids.entry(7).or_default().packets = 2;
        let summary = RunSummary {
            stats,
            elapsed: Duration::from_millis(1500),
        };
        let report = Report {
            source: config.source.to_string(),
            sink: config.sink.to_string(),
            timing: config.timing.name(),
            dropped: summary.stats.dropped(),
            summary: &summary,
        };

        let text = render_text(&report).unwrap();

        assert!(text.starts_with("file:in.dat -> udp:127.0.0.1:9000 (forward_through)"));
        assert!(text.contains("Elapsed:    1.500s"), "{text}");
        assert!(text.contains("Dropped:    1 (oversized 0, apid 1"), "{text}");
        assert!(text.contains("     7           2"), "{text}");
    }
}
