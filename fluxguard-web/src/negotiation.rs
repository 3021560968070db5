//! 内容协商
//!
//! 根据请求的 `Accept` 头从可生成的表示中选出一个。

use std::cmp::Ordering;
use std::fmt;

/// 媒体类型，例如 `application/json; charset=utf-8; q=0.8`
///
/// 类型与参数名统一转为小写；`q` 参数单独保存在 `quality` 中。
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    type_: String,
    subtype: String,
    params: Vec<(String, String)>,
    quality: f32,
}

impl MediaType {
    pub fn new(type_: &str, subtype: &str) -> Self {
        Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params: Vec::new(),
            quality: 1.0,
        }
    }

    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    pub fn application_problem_json() -> Self {
        Self::new("application", "problem+json")
    }

    pub fn text_html() -> Self {
        Self::new("text", "html")
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    pub fn all() -> Self {
        Self::new("*", "*")
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.params.retain(|(k, _)| *k != name);
        self.params.push((name, value.to_string()));
        self
    }

    pub fn with_charset(self, charset: &str) -> Self {
        self.with_param("charset", charset)
    }

    /// 解析单个媒体类型，格式非法时返回 `None`
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.split(';');
        let essence = parts.next()?.trim();
        let (type_, subtype) = if essence == "*" {
            ("*", "*")
        } else {
            essence.split_once('/')?
        };
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if !is_token(type_) || !is_token(subtype) {
            return None;
        }
        if type_ == "*" && subtype != "*" {
            return None;
        }

        let mut media = Self::new(type_, subtype);
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (name, value) = param.split_once('=')?;
            let (name, value) = (name.trim(), value.trim().trim_matches('"'));
            if !is_token(name) {
                return None;
            }
            if name.eq_ignore_ascii_case("q") {
                let q: f32 = value.parse().ok()?;
                if !(0.0..=1.0).contains(&q) {
                    return None;
                }
                media.quality = q;
            } else {
                media = media.with_param(name, value);
            }
        }
        Some(media)
    }

    /// 解析 `Accept` 头
    ///
    /// 缺失、为空或全部条目非法时视为 `*/*`；非法条目单独跳过。
    pub fn parse_accept(header: Option<&str>) -> Vec<Self> {
        let parsed: Vec<Self> = header
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| {
                let media = Self::parse(s);
                if media.is_none() {
                    tracing::debug!(entry = s.trim(), "Skipping invalid Accept entry");
                }
                media
            })
            .collect();

        if parsed.is_empty() {
            vec![Self::all()]
        } else {
            parsed
        }
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `type/subtype`，不含参数
    pub fn essence(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    pub fn is_wildcard_type(&self) -> bool {
        self.type_ == "*"
    }

    pub fn is_wildcard_subtype(&self) -> bool {
        self.subtype == "*" || self.subtype.starts_with("*+")
    }

    /// 是否包含另一个类型：`*/*` 包含一切，`text/*` 包含 `text/html`，
    /// `application/*+json` 包含 `application/problem+json`
    pub fn includes(&self, other: &MediaType) -> bool {
        if self.is_wildcard_type() {
            return true;
        }
        if self.type_ != other.type_ {
            return false;
        }
        if self.subtype == other.subtype || self.subtype == "*" {
            return true;
        }
        match self.subtype.strip_prefix("*+") {
            Some(suffix) => other
                .subtype
                .rsplit_once('+')
                .is_some_and(|(_, s)| s == suffix),
            None => false,
        }
    }

    pub fn is_compatible_with(&self, other: &MediaType) -> bool {
        self.includes(other) || other.includes(self)
    }

    /// 越具体越大：通配类型 < 通配子类型 < 具体类型，参数越多越具体
    fn specificity(&self) -> usize {
        let base = if self.is_wildcard_type() {
            0
        } else if self.is_wildcard_subtype() {
            1
        } else {
            2
        };
        base * 100 + self.params.len()
    }

    fn without_quality(&self) -> Self {
        let mut media = self.clone();
        media.quality = 1.0;
        media
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (name, value) in &self.params {
            write!(f, "; {}={}", name, value)?;
        }
        Ok(())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

/// 内容协商器
pub trait ContentNegotiator: Send + Sync {
    /// 从 `producible` 中选出客户端最能接受的一个；没有可接受的表示时返回 `None`
    fn negotiate(&self, acceptable: &[MediaType], producible: &[MediaType]) -> Option<MediaType>;
}

/// 基于 `Accept` 头的默认协商器
///
/// 可接受类型按质量降序、具体程度降序排列（稳定排序保留客户端顺序），
/// 依次寻找第一个兼容的可生成类型。`q=0` 的条目表示明确拒绝。
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptHeaderNegotiator;

impl ContentNegotiator for AcceptHeaderNegotiator {
    fn negotiate(&self, acceptable: &[MediaType], producible: &[MediaType]) -> Option<MediaType> {
        let (mut accepted, refused): (Vec<&MediaType>, Vec<&MediaType>) =
            acceptable.iter().partition(|m| m.quality > 0.0);

        accepted.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.specificity().cmp(&a.specificity()))
        });

        accepted.iter().find_map(|wanted| {
            producible
                .iter()
                .filter(|p| !refused.iter().any(|r| r.includes(p)))
                .find(|p| wanted.is_compatible_with(p))
                .map(MediaType::without_quality)
        })
    }
}
