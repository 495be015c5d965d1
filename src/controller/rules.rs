//! Request classification.
//!
//! An ordered list of (predicate, class) rules evaluated top to bottom;
//! the first matching rule wins. The order encodes the precedence the
//! caching strategies depend on, so it is explicit rather than buried in
//! cascading conditionals.

use url::Url;

use crate::domain::{FetchRequest, RequestMode};

/// Strategy class a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Not intercepted; the host forwards it to the network untouched.
    Passthrough,
    /// Network-only with a synthetic offline fallback; never cached.
    Api,
    /// Cache-first against the images partition.
    Image,
    /// Network-first against the dynamic partition.
    Navigation,
    /// Cache-first against the static partition, filled on miss.
    StaticAsset,
}

type Predicate = Box<dyn Fn(&FetchRequest) -> bool + Send + Sync>;

pub struct Rule {
    pub name: &'static str,
    pub class: RequestClass,
    matches: Predicate,
}

impl Rule {
    fn new(
        name: &'static str,
        class: RequestClass,
        matches: impl Fn(&FetchRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            class,
            matches: Box::new(matches),
        }
    }

    pub fn matches(&self, request: &FetchRequest) -> bool {
        (self.matches)(request)
    }
}

pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    pub fn new(origin: Url, api_prefix: String, image_prefixes: Vec<String>) -> Self {
        let rules = vec![
            Rule::new("passthrough", RequestClass::Passthrough, move |request| {
                !request.is_get() || !request.same_origin(&origin)
            }),
            Rule::new("api", RequestClass::Api, move |request| {
                request.path().starts_with(&api_prefix)
            }),
            Rule::new("image", RequestClass::Image, move |request| {
                image_prefixes
                    .iter()
                    .any(|prefix| request.path().starts_with(prefix))
            }),
            Rule::new("navigation", RequestClass::Navigation, |request| {
                request.mode == RequestMode::Navigate
            }),
            // Everything left over is treated as a static asset.
            Rule::new("static-asset", RequestClass::StaticAsset, |_| true),
        ];
        Self { rules }
    }

    /// First matching rule wins. The final rule is a catch-all, so this
    /// always resolves.
    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(request))
            .map(|rule| rule.class)
            .unwrap_or(RequestClass::Passthrough)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}
