//! Well-known application detection

use super::{Inspector, ProcessSample};
use crate::models::KNOWN_APPLICATIONS;
use regex::Regex;

/// Matches known application process names as whole words
pub struct ApplicationInspector {
    patterns: Vec<(Regex, &'static str)>,
}

impl ApplicationInspector {
    pub fn new() -> Self {
        let patterns = KNOWN_APPLICATIONS
            .iter()
            .filter_map(|(name, app_type)| {
                Regex::new(&format!(r"\b{}\b", regex::escape(name)))
                    .ok()
                    .map(|re| (re, *app_type))
            })
            .collect();
        Self { patterns }
    }

    fn find(&self, haystack: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(haystack))
            .map(|(_, app_type)| *app_type)
    }
}

impl Default for ApplicationInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector for ApplicationInspector {
    type Output = &'static str;

    fn name(&self) -> &'static str {
        "application"
    }

    /// The executable path takes precedence over the command line
    fn inspect(&self, sample: &ProcessSample) -> Option<&'static str> {
        self.find(&sample.exe).or_else(|| self.find(&sample.cmdline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(exe: &str, cmdline: &str) -> ProcessSample {
        ProcessSample {
            exe: exe.into(),
            cmdline: cmdline.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_whole_word_matching() {
        let inspector = ApplicationInspector::new();
        assert_eq!(
            inspector.inspect(&sample("/usr/sbin/nginx", "nginx: master process")),
            Some("nginx")
        );
        assert_eq!(
            inspector.inspect(&sample("/usr/bin/java", "/opt/kafka/bin/kafka-server-start.sh config")),
            Some("kafka_server")
        );
        assert_eq!(inspector.inspect(&sample("/usr/sbin/mysqld", "mysqld")), None);
        assert_eq!(inspector.inspect(&sample("", "mysqldump --all-databases")), None);
        assert_eq!(inspector.inspect(&sample("", "/usr/bin/mysql")), Some("mysql"));
        assert_eq!(inspector.inspect(&sample("/bin/app", "app --nginxish")), None);
    }

    #[test]
    fn test_exe_takes_precedence() {
        let inspector = ApplicationInspector::new();
        assert_eq!(
            inspector.inspect(&sample("/usr/bin/mysql", "nginx-proxy")),
            Some("mysql")
        );
    }
}
