//! Path template matching and URL building.
//!
//! Templates are `/`-separated; a segment starting with `:` binds a named
//! parameter. Leading and trailing empty segments are ignored on both
//! templates and paths, so `/users/123/` matches `/users/:user`.
//!
//! Parameter values are percent-encoded by [`build_url`] and decoded again
//! by [`Router::classify`], so a value may hold spaces or `/`.

use std::collections::{HashMap, HashSet};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Bytes escaped in a path parameter value.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Parameter values extracted from a path, by parameter name.
pub type PathParams = HashMap<String, String>;

/// Error building a URL from a template.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("unknown parameter: {0}")]
    MissingParameter(String),
    #[error("not all parameters were built into URL: want {want}, got {got}")]
    UnusedParameters { want: usize, got: usize },
}

#[derive(Clone, Debug)]
struct Template {
    segments: Vec<String>,
    is_param: Vec<bool>,
    params: usize,
}

impl Template {
    fn parse(mask: &str) -> Self {
        let mut segments: Vec<String> = split_path(mask).into_iter().map(str::to_owned).collect();
        let mut is_param = vec![false; segments.len()];
        let mut params = 0;
        for (segment, param) in segments.iter_mut().zip(is_param.iter_mut()) {
            if let Some(name) = segment.strip_prefix(':').map(str::to_owned) {
                *segment = name;
                *param = true;
                params += 1;
            }
        }
        Self {
            segments,
            is_param,
            params,
        }
    }

    fn matches(&self, parts: &[String]) -> Option<PathParams> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let literals_match = parts
            .iter()
            .zip(&self.segments)
            .zip(&self.is_param)
            .all(|((part, segment), param)| *param || part == segment);
        if !literals_match {
            return None;
        }
        let mut params = PathParams::with_capacity(self.params);
        for ((part, segment), param) in parts.iter().zip(&self.segments).zip(&self.is_param) {
            if *param {
                params.insert(segment.clone(), part.clone());
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Matches request paths against an ordered set of templates.
///
/// The first registered template that matches wins, so overlapping
/// templates resolve deterministically by registration order.
#[derive(Clone, Debug, Default)]
pub struct Router {
    templates: Vec<Template>,
}

impl Router {
    pub fn new<I, S>(masks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            templates: masks.into_iter().map(|m| Template::parse(m.as_ref())).collect(),
        }
    }

    /// Append a template, returning its index.
    pub fn push(&mut self, mask: &str) -> usize {
        self.templates.push(Template::parse(mask));
        self.templates.len() - 1
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Index of the first template matching `path`, with the bound parameters.
    ///
    /// `path` is the raw request path; each segment is percent-decoded
    /// before matching.
    pub fn classify(&self, path: &str) -> Option<(usize, PathParams)> {
        let parts: Vec<String> = split_path(path)
            .into_iter()
            .map(|part| percent_decode_str(part).decode_utf8_lossy().into_owned())
            .collect();
        self.templates
            .iter()
            .enumerate()
            .find_map(|(index, template)| template.matches(&parts).map(|params| (index, params)))
    }
}

/// Names of the parameters in `mask`, in order.
pub fn url_keys(mask: &str) -> Vec<&str> {
    mask.split('/').filter_map(|part| part.strip_prefix(':')).collect()
}

/// The static prefix of `mask`, up to its first parameter.
pub fn cut_url_params(mask: &str) -> String {
    match mask.split_once("/:") {
        None => mask.to_owned(),
        Some((before, _)) if before.ends_with('/') => before.to_owned(),
        Some((before, _)) => format!("{before}/"),
    }
}

/// Substitute `params` into `mask`.
///
/// Every parameter of the template must be supplied, and every supplied
/// value must be used. A parameter may appear more than once. Values are
/// percent-encoded as path segments.
pub fn build_url(mask: &str, params: &HashMap<String, String>) -> Result<String, UrlError> {
    let mut used = HashSet::new();
    let mut parts = Vec::new();
    for part in mask.split('/') {
        match part.strip_prefix(':') {
            Some(name) => {
                let value = params
                    .get(name)
                    .ok_or_else(|| UrlError::MissingParameter(name.to_owned()))?;
                used.insert(name);
                parts.push(utf8_percent_encode(value, SEGMENT).to_string());
            }
            None => parts.push(part.to_owned()),
        }
    }
    if used.len() != params.len() {
        return Err(UrlError::UnusedParameters {
            want: params.len(),
            got: used.len(),
        });
    }
    Ok(parts.join("/"))
}
