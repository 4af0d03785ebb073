use crate::formats::FormatId;
use crate::result::attribute::{Attribute, AttributeName, AttributeValue, ValueFormat};
use crate::result::tree::{NodeId, ResultNode};
use crate::result::HeaderName;

/// Mutable state of a header while it is being parsed.
///
/// Attributes are append-only. Validity starts out true and is cleared by
/// [`invalidate`](Self::invalidate) or by an attribute whose format rejects
/// its value; only [`recover`](Self::recover) sets it back.
#[derive(Debug)]
pub struct ResultBuilder {
    name: HeaderName,
    offset: u64,
    detector: FormatId,
    attributes: Vec<Attribute>,
    children: Vec<NodeId>,
    valid: bool,
}

impl ResultBuilder {
    pub fn new(name: HeaderName, offset: u64, detector: FormatId) -> Self {
        Self {
            name,
            offset,
            detector,
            attributes: Vec::new(),
            children: Vec::new(),
            valid: true,
        }
    }

    pub fn name(&self) -> HeaderName {
        self.name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn recover(&mut self) {
        self.valid = true;
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn add_attribute(&mut self, name: AttributeName, value: AttributeValue) {
        self.attributes.push(Attribute::new(name, value));
    }

    pub fn add_formatted(
        &mut self,
        name: AttributeName,
        value: AttributeValue,
        format: &dyn ValueFormat,
    ) -> bool {
        let attribute = Attribute::formatted(name, value, format);
        let valid = attribute.valid;
        if !valid {
            self.valid = false;
        }
        self.attributes.push(attribute);
        valid
    }

    pub(crate) fn add_child(&mut self, id: NodeId) {
        self.children.push(id);
    }

    /// Freezes the builder into a node covering `length` bytes.
    pub fn build(self, length: u64) -> ResultNode {
        ResultNode::new(
            self.name,
            self.attributes,
            self.children,
            self.offset,
            length,
            self.valid,
            self.detector,
        )
    }
}
