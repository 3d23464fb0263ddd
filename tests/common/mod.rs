#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use docqa::{GenerationError, LlmProvider, ProviderRequest};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// Writes a one-page PDF whose page shows each sentence on its own line.
pub fn write_pdf(path: &Path, sentences: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut operations = Vec::new();
    for (idx, sentence) in sentences.iter().enumerate() {
        let y = 780 - 20 * idx as i64;
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
        operations.push(Operation::new("Td", vec![40.into(), y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(format!("{sentence} "))],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

/// Writes bytes that no PDF parser accepts.
pub fn write_garbage_pdf(path: &Path) {
    fs::write(path, b"this is not a pdf at all").expect("write garbage");
}

/// Provider that records prompts and replies with a fixed answer.
pub struct RecordingProvider {
    pub prompts: Rc<RefCell<Vec<String>>>,
    pub reply: String,
}

impl RecordingProvider {
    pub fn new(reply: &str) -> (Self, Rc<RefCell<Vec<String>>>) {
        let prompts = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                prompts: Rc::clone(&prompts),
                reply: reply.to_string(),
            },
            prompts,
        )
    }
}

impl LlmProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        self.prompts.borrow_mut().push(request.prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Provider whose API always answers with a server error.
pub struct FailingProvider;

impl LlmProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn answer(&self, _request: &ProviderRequest<'_>) -> Result<String, GenerationError> {
        Err(GenerationError::Status {
            provider: "failing",
            status: 500,
            body: "internal error".to_string(),
        })
    }
}
