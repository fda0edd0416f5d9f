//! Compile-time parsing of bit patterns such as `"0000 00ss ssst tttt dddd d000 0010 0000"`.
//! Binary digits must match exactly, letters name the operand occupying those bits.

const MAX_COMPONENTS: usize = 12;

const fn remove_spaces(s: &str) -> [u8; u32::BITS as usize] {
    let raw = s.as_bytes();
    let mut result = [0; u32::BITS as usize];

    let mut i = 0;
    let mut j = 0;
    while i < raw.len() {
        if raw[i] != b' ' {
            assert!(j < u32::BITS as usize, "pattern is longer than 32 bits");
            result[j] = raw[i];
            j += 1;
        }
        i += 1;
    }
    assert!(j == u32::BITS as usize, "pattern is shorter than 32 bits");
    result
}

const fn is_binary_char(c: u8) -> bool {
    c == b'0' || c == b'1'
}

const fn extract(num: u32, shift: u32, len: u32) -> u32 {
    if len == u32::BITS {
        num
    } else {
        (num >> shift) & ((1 << len) - 1)
    }
}

/// A field of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// `rs`
    Source,
    /// `rt`
    Target,
    /// `rd`
    Destination,
    /// `sa`, the shift amount.
    Shift,
    Immediate,
    /// Branch or load/store displacement.
    Offset,
    /// Base register of a load/store.
    Base,
    /// 26-bit jump index of `j` and `jal`.
    JumpIndex,
    /// Code field of `syscall` and `break`.
    Code,
    /// 25-bit command word of a GTE operation.
    Command,
}

impl Operand {
    pub const fn from_char(value: char) -> Self {
        match value {
            's' => Self::Source,
            't' => Self::Target,
            'd' => Self::Destination,
            'h' => Self::Shift,
            'k' => Self::Immediate,
            'f' => Self::Offset,
            'b' => Self::Base,
            'j' => Self::JumpIndex,
            'c' => Self::Code,
            'g' => Self::Command,
            _ => panic!("invalid operand"),
        }
    }

    pub const fn is_register(&self) -> bool {
        matches!(
            self,
            Self::Source | Self::Destination | Self::Target | Self::Base
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternValue {
    Constant(u32),
    Variable(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PatternComponent {
    shift: u32,
    len: u32,
    value: PatternValue,
}

impl PatternComponent {
    /// Parses the component starting at `start`, returning it and the index right after it.
    const fn parse(input: &[u8; u32::BITS as usize], start: usize) -> (usize, Self) {
        let first = input[start];
        let binary = is_binary_char(first);

        let mut end = start;
        let mut constant = 0;
        while end < input.len() {
            let c = input[end];
            if binary {
                if !is_binary_char(c) {
                    break;
                }
                constant = (constant << 1) | (c - b'0') as u32;
            } else if c != first {
                break;
            }
            end += 1;
        }

        let len = (end - start) as u32;
        let value = if binary {
            PatternValue::Constant(constant)
        } else {
            PatternValue::Variable(Operand::from_char(first as char))
        };

        let component = Self {
            shift: u32::BITS - end as u32,
            len,
            value,
        };
        (end, component)
    }

    const fn matches(&self, num: u32) -> bool {
        match self.value {
            PatternValue::Constant(c) => extract(num, self.shift, self.len) == c,
            PatternValue::Variable(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPattern {
    components: [Option<PatternComponent>; MAX_COMPONENTS],
}

impl InstructionPattern {
    pub const fn new(identifier: &str) -> Self {
        let mut components = [None; MAX_COMPONENTS];
        let raw = remove_spaces(identifier);

        let mut start = 0;
        let mut i = 0;
        while start != u32::BITS as usize {
            let (next, component) = PatternComponent::parse(&raw, start);
            components[i] = Some(component);
            start = next;
            i += 1;
        }

        Self { components }
    }

    pub const fn matches(&self, num: u32) -> bool {
        let mut i = 0;
        while i < MAX_COMPONENTS {
            match &self.components[i] {
                Some(component) if !component.matches(num) => return false,
                Some(_) => i += 1,
                None => break,
            }
        }
        true
    }

    pub const fn get(&self, op: Operand, num: u32) -> Option<u32> {
        let mut i = 0;
        while i < MAX_COMPONENTS {
            if let Some(component) = &self.components[i] {
                if let PatternValue::Variable(var) = component.value {
                    if var as u8 == op as u8 {
                        return Some(extract(num, component.shift, component.len));
                    }
                }
                i += 1;
            } else {
                break;
            }
        }
        None
    }
}
