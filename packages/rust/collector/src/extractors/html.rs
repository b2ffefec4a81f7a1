//! HTML document extractor.

use std::sync::LazyLock;

use repoctx_shared::{EntityRef, FileKind, Fragment, SourceFile, kinds, rel};
use scraper::{Html, Selector};

use super::Extractor;
use super::markdown::document_link;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3").expect("heading selector"));

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

static SCRIPT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[src]").expect("script selector"));

pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn kinds(&self) -> &'static [FileKind] {
        &[FileKind::Html]
    }

    fn extract(&self, file: &SourceFile, bytes: &[u8]) -> Result<Fragment, String> {
        let text = String::from_utf8_lossy(bytes);
        let doc = Html::parse_document(&text);

        let headings: Vec<(String, u8)> = doc
            .select(&HEADING_SEL)
            .filter_map(|el| {
                let title = el.text().collect::<String>().trim().to_string();
                let level = el.value().name()[1..].parse().unwrap_or(1);
                (!title.is_empty()).then_some((title, level))
            })
            .collect();

        let title = doc
            .select(&TITLE_SEL)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| headings.iter().find(|(_, l)| *l == 1).map(|(t, _)| t.clone()));

        let mut frag = Fragment::new(file.path.clone());
        let mut attrs = vec![("format", "html".to_string())];
        if let Some(title) = title {
            attrs.push(("title", title));
        }
        let scripts: Vec<String> = doc
            .select(&SCRIPT_SEL)
            .filter_map(|el| el.value().attr("src"))
            .map(str::to_string)
            .collect();
        if !scripts.is_empty() {
            attrs.push(("scripts", scripts.join(", ")));
        }
        let page = frag.entity_with(file.path.clone(), kinds::DOCUMENT, attrs);

        for (heading, level) in headings {
            let section = frag.entity_with(heading, kinds::SECTION, [("level", level.to_string())]);
            frag.relate(&page, &section, rel::CONTAINS);
        }

        let mut links: Vec<String> = doc
            .select(&LINK_SEL)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| document_link(&file.path, href))
            .filter(|target| *target != file.path)
            .collect();
        links.sort();
        links.dedup();
        for target in links {
            let to = EntityRef::new(target.clone(), target, kinds::DOCUMENT);
            frag.relate(&page, &to, rel::LINKS_TO);
        }

        Ok(frag)
    }

    fn name(&self) -> &str {
        "html"
    }
}
