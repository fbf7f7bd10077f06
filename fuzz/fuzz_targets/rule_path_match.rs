#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;

use shellcache::config::{Config, RuleSpec, ShellManifest, Strategy, ValidatedConfig};
use shellcache::rules::{RuleMatcher, compile_rules};
use shellcache::store::CacheKey;

fn matcher() -> &'static RuleMatcher {
    static MATCHER: OnceLock<RuleMatcher> = OnceLock::new();
    MATCHER.get_or_init(|| {
        let patterns = [
            (r"\.(js|css)$", Strategy::StaleWhileRevalidate),
            (r"\.(png|jpg|jpeg|svg|webp|ico)$", Strategy::CacheFirst),
            (r"\.(woff|woff2|ttf|eot)$", Strategy::CacheFirst),
            (r"/api/", Strategy::NetworkFirst),
        ];
        let rules = patterns
            .iter()
            .enumerate()
            .map(|(index, (pattern, strategy))| RuleSpec {
                id: Arc::<str>::from(format!("rule#{index}")),
                pattern: Arc::<str>::from(*pattern),
                strategy: *strategy,
                max_age_ms: Some(300_000),
                max_entries: Some(50),
            })
            .collect();
        let manifest = ShellManifest {
            assets: Arc::from(vec![Arc::<str>::from("/")].into_boxed_slice()),
        };
        let config = ValidatedConfig::new(Config { rules, manifest }).expect("validate config");
        RuleMatcher::new(compile_rules(&config).expect("compile rules"))
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = matcher().matches(text);
        let _ = CacheKey::request_path(text);
    }
});
