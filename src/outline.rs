//! Outline of the top-level structure of an AIR module
//!
//! The outline is not a parser for the IR. It walks the token stream and
//! records what the driver needs to reason about placement and artifacts:
//! - `func.func @name` and `air.channel @name` declarations
//! - `air.segment @name { ... }` regions
//! - `air.herd @name ... in (%sx=%c2, %sy=%c1) ... attributes {x_loc = 7 : i64, y_loc = 2 : i64} { ... }`
//!
//! Herd sizes are resolved through the `arith.constant` definitions seen
//! earlier in the text. Locations only exist after placement.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::{tokens, Token};

const SEGMENT_OPS: [&str; 2] = ["air.segment", "air.partition"];
const HERD_OPS: [&str; 2] = ["air.herd", "air.herd_launch"];

/// A herd as seen in module text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HerdOutline {
    /// Symbol name, `None` for an anonymous herd
    pub name: Option<String>,
    /// Declared size as (columns, rows), `None` when not a known constant
    pub size: Option<(u64, u64)>,
    /// Placed origin as (column, row), present after placement
    pub location: Option<(u64, u64)>,
}

impl HerdOutline {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// A segment and the herds nested in it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentOutline {
    /// Symbol name, `None` for herds that live outside any segment
    pub name: Option<String>,
    pub herds: Vec<HerdOutline>,
}

impl SegmentOutline {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<top-level>")
    }
}

/// Top-level symbols of a module
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleOutline {
    pub functions: Vec<String>,
    pub channels: Vec<String>,
    pub segments: Vec<SegmentOutline>,
}

impl ModuleOutline {
    /// Scan module text
    pub fn scan(text: &str) -> Self {
        OutlineScanner::new(tokens(text)).scan()
    }

    /// Every herd together with the segment that contains it
    pub fn herds(&self) -> impl Iterator<Item = (&SegmentOutline, &HerdOutline)> {
        self.segments
            .iter()
            .flat_map(|segment| segment.herds.iter().map(move |herd| (segment, herd)))
    }

    pub fn herd_count(&self) -> usize {
        self.segments.iter().map(|s| s.herds.len()).sum()
    }
}

impl fmt::Display for ModuleOutline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Functions: {}", self.functions.join(", "))?;
        if !self.channels.is_empty() {
            writeln!(f, "Channels: {}", self.channels.join(", "))?;
        }
        for segment in &self.segments {
            writeln!(f, "Segment {}:", segment.display_name())?;
            for herd in &segment.herds {
                write!(f, "  Herd {}", herd.display_name())?;
                if let Some((cols, rows)) = herd.size {
                    write!(f, " size {}x{}", cols, rows)?;
                }
                if let Some((col, row)) = herd.location {
                    write!(f, " at ({}, {})", col, row)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// What an open brace belongs to
enum Scope {
    Segment(usize),
    Other,
}

struct OutlineScanner {
    tokens: Vec<Token>,
    pos: usize,
    constants: HashMap<String, i64>,
    scopes: Vec<Scope>,
    outline: ModuleOutline,
}

impl OutlineScanner {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            constants: HashMap::new(),
            scopes: Vec::new(),
            outline: ModuleOutline::default(),
        }
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn scan(mut self) -> ModuleOutline {
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            match token {
                Token::Value(name) => self.scan_constant(name),
                Token::Ident(op) if op == "func.func" => {
                    self.pos += 1;
                    if let Some(name) = self.take_symbol() {
                        self.outline.functions.push(name);
                    }
                }
                Token::Ident(op) if op == "air.channel" => {
                    self.pos += 1;
                    if let Some(name) = self.take_symbol() {
                        self.outline.channels.push(name);
                    }
                }
                Token::Ident(op) if SEGMENT_OPS.contains(&op.as_str()) => self.scan_segment(),
                Token::Ident(op) if HERD_OPS.contains(&op.as_str()) => self.scan_herd(),
                Token::LBrace => {
                    self.scopes.push(Scope::Other);
                    self.pos += 1;
                }
                Token::RBrace => {
                    self.scopes.pop();
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
        self.outline
    }

    /// `%c2 = arith.constant 2 : index`
    fn scan_constant(&mut self, name: String) {
        let is_constant = matches!(
            (self.peek_at(1), self.peek_at(2)),
            (Some(Token::Equals), Some(Token::Ident(op))) if op == "arith.constant"
        );
        if is_constant {
            if let Some(Token::Integer(value)) = self.peek_at(3) {
                self.constants.insert(name, *value);
                self.pos += 4;
                return;
            }
        }
        self.pos += 1;
    }

    fn take_symbol(&mut self) -> Option<String> {
        if let Some(Token::Symbol(name)) = self.tokens.get(self.pos) {
            let name = name.clone();
            self.pos += 1;
            Some(name)
        } else {
            None
        }
    }

    fn current_segment(&self) -> Option<usize> {
        self.scopes.iter().rev().find_map(|scope| match scope {
            Scope::Segment(idx) => Some(*idx),
            Scope::Other => None,
        })
    }

    fn scan_segment(&mut self) {
        self.pos += 1;
        let name = self.take_symbol();
        self.outline.segments.push(SegmentOutline {
            name,
            herds: Vec::new(),
        });
        let idx = self.outline.segments.len() - 1;
        let header = self.scan_header();
        if header.has_body {
            self.scopes.push(Scope::Segment(idx));
        }
    }

    fn scan_herd(&mut self) {
        self.pos += 1;
        let name = self.take_symbol();
        let header = self.scan_header();

        let size = match header.sizes.as_slice() {
            [cols, rows] => self.resolve(cols).zip(self.resolve(rows)),
            _ => None,
        };
        let location = header
            .attributes
            .get("x_loc")
            .copied()
            .zip(header.attributes.get("y_loc").copied())
            .and_then(|(x, y)| Some((u64::try_from(x).ok()?, u64::try_from(y).ok()?)));

        let herd = HerdOutline {
            name,
            size,
            location,
        };

        let segment = match self.current_segment() {
            Some(idx) => idx,
            None => self.top_level_segment(),
        };
        self.outline.segments[segment].herds.push(herd);

        // The herd body can only hold ops, never nested segments.
        if header.has_body {
            self.scopes.push(Scope::Other);
        }
    }

    fn top_level_segment(&mut self) -> usize {
        if let Some(idx) = self.outline.segments.iter().position(|s| s.name.is_none()) {
            return idx;
        }
        self.outline.segments.push(SegmentOutline {
            name: None,
            herds: Vec::new(),
        });
        self.outline.segments.len() - 1
    }

    fn resolve(&self, operand: &SizeOperand) -> Option<u64> {
        let value = match operand {
            SizeOperand::Literal(n) => *n,
            SizeOperand::Value(name) => *self.constants.get(name)?,
        };
        u64::try_from(value).ok()
    }

    /// Walk an op header up to the brace that opens its body.
    ///
    /// Stops without consuming anything past the header when the op has no
    /// body (the next op starts or an enclosing region closes).
    fn scan_header(&mut self) -> OpHeader {
        let mut header = OpHeader::default();
        let mut parens = 0usize;

        while let Some(token) = self.tokens.get(self.pos).cloned() {
            match token {
                Token::LParen | Token::LBracket | Token::LAngle => parens += 1,
                Token::RParen | Token::RBracket | Token::RAngle => parens = parens.saturating_sub(1),
                Token::Ident(word) if parens == 0 && word == "in" => {
                    if let Some(Token::LParen) = self.peek_at(1) {
                        self.pos += 2;
                        header.sizes = self.scan_size_operands();
                        continue;
                    }
                }
                Token::Ident(word) if parens == 0 && word == "attributes" => {
                    if let Some(Token::LBrace) = self.peek_at(1) {
                        self.pos += 2;
                        header.attributes = self.scan_attribute_dict();
                        continue;
                    }
                }
                Token::LBrace if parens == 0 => {
                    header.has_body = true;
                    self.pos += 1;
                    return header;
                }
                Token::RBrace if parens == 0 => return header,
                Token::Value(_) if parens == 0 && self.peek_at(1) == Some(&Token::Equals) => {
                    return header;
                }
                _ => {}
            }
            self.pos += 1;
        }
        header
    }

    /// `%sx=%c2, %sy=%c1)` after the opening paren of `in (`
    fn scan_size_operands(&mut self) -> Vec<SizeOperand> {
        let mut sizes = Vec::new();
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::RParen => break,
                Token::Equals => match self.tokens.get(self.pos) {
                    Some(Token::Value(name)) => sizes.push(SizeOperand::Value(name.clone())),
                    Some(Token::Integer(n)) => sizes.push(SizeOperand::Literal(*n)),
                    _ => {}
                },
                _ => {}
            }
        }
        sizes
    }

    /// `x_loc = 7 : i64, y_loc = 2 : i64}` after the opening brace
    fn scan_attribute_dict(&mut self) -> HashMap<String, i64> {
        let mut attributes = HashMap::new();
        let mut depth = 0usize;
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::LBrace => depth += 1,
                Token::RBrace if depth == 0 => break,
                Token::RBrace => depth -= 1,
                Token::Ident(key) if depth == 0 => {
                    if let (Some(Token::Equals), Some(Token::Integer(value))) =
                        (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
                    {
                        attributes.insert(key, *value);
                        self.pos += 2;
                    }
                }
                _ => {}
            }
        }
        attributes
    }
}

#[derive(Debug, Clone)]
enum SizeOperand {
    Literal(i64),
    Value(String),
}

#[derive(Debug, Default)]
struct OpHeader {
    sizes: Vec<SizeOperand>,
    attributes: HashMap<String, i64>,
    has_body: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TWO_HERDS: &str = r#"
module {
  air.channel @ChanIn [1, 1]
  func.func @forward(%arg0: memref<64xi32>) {
    %c1 = arith.constant 1 : index
    %c2 = arith.constant 2 : index
    air.launch (%a0) in (%a1=%c1) args(%x=%arg0) : memref<64xi32> {
      air.segment @seg args(%y=%x) : memref<64xi32> {
        %c1_0 = arith.constant 1 : index
        air.herd @herd_a tile (%tx, %ty) in (%sx=%c2, %sy=%c1_0) {
          %0 = memref.alloc() : memref<32xi32, 2>
          air.herd_terminator
        }
        air.herd @herd_b tile (%tx, %ty) in (%sx=%c1_0, %sy=%c1_0) attributes {x_loc = 9 : i64, y_loc = 3 : i64} {
          air.herd_terminator
        }
        air.segment_terminator
      }
      air.launch_terminator
    }
    return
  }
}
"#;

    #[test]
    fn test_scan_segments_and_herds() {
        let outline = ModuleOutline::scan(TWO_HERDS);
        assert_eq!(outline.functions, vec!["forward".to_string()]);
        assert_eq!(outline.channels, vec!["ChanIn".to_string()]);
        assert_eq!(
            outline.segments,
            vec![SegmentOutline {
                name: Some("seg".to_string()),
                herds: vec![
                    HerdOutline {
                        name: Some("herd_a".to_string()),
                        size: Some((2, 1)),
                        location: None,
                    },
                    HerdOutline {
                        name: Some("herd_b".to_string()),
                        size: Some((1, 1)),
                        location: Some((9, 3)),
                    },
                ],
            }]
        );
        assert_eq!(outline.herd_count(), 2);
    }

    #[test]
    fn test_async_segments_are_separate() {
        let text = r#"
func.func @f() {
  %c1 = arith.constant 1 : index
  %0 = air.segment @seg_a async {
    air.herd @h0 tile (%x, %y) in (%sx=%c1, %sy=%c1) {
    }
  }
  %1 = air.segment @seg_b async [%0] {
    air.herd @h1 tile (%x, %y) in (%sx=%c1, %sy=%c1) {
    }
  }
  return
}
"#;
        let outline = ModuleOutline::scan(text);
        let names: Vec<_> = outline
            .herds()
            .map(|(seg, herd)| (seg.display_name(), herd.display_name()))
            .collect();
        assert_eq!(names, vec![("seg_a", "h0"), ("seg_b", "h1")]);
    }

    #[test]
    fn test_herd_outside_segment_gets_top_level_segment() {
        let text = r#"
func.func @f() {
  %c4 = arith.constant 4 : index
  air.herd tile (%x, %y) in (%sx=%c4, %sy=%c4) {
  }
  return
}
"#;
        let outline = ModuleOutline::scan(text);
        assert_eq!(outline.segments.len(), 1);
        assert_eq!(outline.segments[0].name, None);
        assert_eq!(outline.segments[0].herds[0].name, None);
        assert_eq!(outline.segments[0].herds[0].size, Some((4, 4)));
    }

    #[test]
    fn test_unknown_size_is_none() {
        let text = "air.herd @h tile (%x, %y) in (%sx=%n, %sy=%n) {\n}";
        let outline = ModuleOutline::scan(text);
        assert_eq!(outline.segments[0].herds[0].size, None);
    }

    #[test]
    fn test_display_lists_placements() {
        let outline = ModuleOutline::scan(TWO_HERDS);
        let text = outline.to_string();
        assert!(text.contains("Segment seg:"));
        assert!(text.contains("Herd herd_b size 1x1 at (9, 3)"));
    }
}
