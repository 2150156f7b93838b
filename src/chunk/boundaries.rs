//! Break point detection for structural chunking

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    /// Whitespace (lowest)
    Word = 1,
    /// Sentence punctuation, including full-width CJK marks
    Sentence = 2,
    /// Blank line (highest)
    Paragraph = 3,
}

/// A potential break point, as a char offset the next chunk may start at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakPoint {
    pub position: usize,
    pub priority: BreakPriority,
}

impl BreakPoint {
    pub fn new(position: usize, priority: BreakPriority) -> Self {
        Self { position, priority }
    }
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '；' | '…')
}

/// Find every break point in `chars`, sorted by position.
///
/// Positions are char offsets, so splitting there never cuts a multi-byte
/// character.
pub fn find_break_points(chars: &[char]) -> Vec<BreakPoint> {
    let mut points = Vec::new();

    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        let priority = match c {
            '\n' if next == Some('\n') => {
                points.push(BreakPoint::new(i + 2, BreakPriority::Paragraph));
                continue;
            }
            '.' | '?' | '!' if next.map_or(false, char::is_whitespace) => BreakPriority::Sentence,
            '\n' => BreakPriority::Sentence,
            c if is_cjk_terminator(c) => BreakPriority::Sentence,
            c if c.is_whitespace() => BreakPriority::Word,
            _ => continue,
        };
        points.push(BreakPoint::new(i + 1, priority));
    }

    points.retain(|p| p.position <= chars.len());
    points.sort_by_key(|p| p.position);
    // Keep the strongest break per position
    points.dedup_by(|later, earlier| {
        if later.position == earlier.position {
            earlier.priority = earlier.priority.max(later.priority);
            true
        } else {
            false
        }
    });
    points
}

/// Best break in `(min, max]`, preferring higher priority then later position
pub fn best_break_in(points: &[BreakPoint], min: usize, max: usize) -> Option<usize> {
    points
        .iter()
        .filter(|p| p.position > min && p.position <= max)
        .max_by_key(|p| (p.priority, p.position))
        .map(|p| p.position)
}
