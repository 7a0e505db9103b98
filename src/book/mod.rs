use crate::util::TreeNode;

/// A book synthesized from a legacy source, ready to be packaged.
#[derive(Debug, Clone, Default)]
pub struct EpubBook {
    pub title: String,
    pub author: String,
    /// XHTML fragment for the book card page.
    pub about_html: String,
    pub pages: Vec<Page>,
    pub toc: Vec<TocNode>,
}

/// One content document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based position in emission order.
    pub page_number: usize,
    /// Page number from the source row, or 0.
    pub page: i64,
    /// Numeric volume, when the source has one.
    pub part: Option<i64>,
    /// Sanitized XHTML body fragment.
    pub body: String,
}

/// A table of contents node (hierarchical)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocNode {
    pub text: String,
    /// `page_number` of the page the entry points at.
    pub target_page: usize,
    /// In-document fragment, without the `#`.
    pub anchor: Option<String>,
    pub children: Vec<TocNode>,
}

impl TreeNode for TocNode {
    fn children_mut(&mut self) -> &mut Vec<Self> {
        &mut self.children
    }
}

impl EpubBook {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Pages ordered by `page_number`.
    pub fn sorted_pages(&self) -> Vec<&Page> {
        let mut pages: Vec<&Page> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.page_number);
        pages
    }
}

impl Page {
    pub fn new(page_number: usize, body: impl Into<String>) -> Self {
        Self {
            page_number,
            page: 0,
            part: None,
            body: body.into(),
        }
    }
}

impl TocNode {
    pub fn new(text: impl Into<String>, target_page: usize) -> Self {
        Self {
            text: text.into(),
            target_page,
            anchor: None,
            children: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        let anchor = anchor.into();
        self.anchor = (!anchor.is_empty()).then_some(anchor);
        self
    }

    pub fn with_child(mut self, child: TocNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree, including self.
    pub fn subtree_size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}
