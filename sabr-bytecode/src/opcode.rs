/// Passes all opcodes as a sequence of `Name = "mnemonic",` into the
/// provided macro. Numbering starts at 1 and is stable; the order below is
/// the wire format.
#[macro_export]
macro_rules! expand_opcodes {
    ($x:path) => {
        $x! {
            None = "none",
            Exit = "exit",

            Value = "value",

            If = "if",
            Jump = "jump",

            For = "for",
            ForFrom = "for_from",
            ForTo = "for_to",
            ForStep = "for_step",
            ForCheck = "for_check",
            ForNext = "for_next",
            ForEnd = "for_end",

            Switch = "switch",
            SwitchCase = "switch_case",
            SwitchEnd = "switch_end",

            Lambda = "lambda",
            Return = "return",
            Local = "local",
            LocalEnd = "local_end",
            Define = "define",

            Datagroup = "datagroup",
            Member = "member",
            DatagroupEnd = "datagroup_end",
            DatagroupExec = "datagroup_exec",

            Set = "set",
            Exec = "exec",
            Addr = "addr",
            Ref = "ref",

            CallBif = "call_bif",

            Add = "add",
            Sub = "sub",
            Mul = "mul",
            Div = "div",
            Mod = "mod",
            Udiv = "udiv",
            Umod = "umod",
            Neg = "neg",
            Inc = "inc",
            Dec = "dec",

            Equ = "equ",
            Neq = "neq",
            Grt = "grt",
            Geq = "geq",
            Lst = "lst",
            Leq = "leq",
            Ugrt = "ugrt",
            Ugeq = "ugeq",
            Ulst = "ulst",
            Uleq = "uleq",

            Fadd = "fadd",
            Fsub = "fsub",
            Fmul = "fmul",
            Fdiv = "fdiv",
            Fmod = "fmod",
            Fneg = "fneg",

            Fequ = "fequ",
            Fneq = "fneq",
            Fgrt = "fgrt",
            Fgeq = "fgeq",
            Flst = "flst",
            Fleq = "fleq",

            Band = "band",
            Bor = "bor",
            Bxor = "bxor",
            Bnot = "bnot",
            Blsft = "blsft",
            Brsft = "brsft",

            Drop = "drop",
            Nip = "nip",
            Dup = "dup",
            Over = "over",
            Tuck = "tuck",
            Swap = "swap",
            Rot = "rot",

            Tdrop = "tdrop",
            Tnip = "tnip",
            Tdup = "tdup",
            Tover = "tover",
            Ttuck = "ttuck",
            Tswap = "tswap",
            Trot = "trot",

            Alloc = "alloc",
            Resize = "resize",
            Free = "free",

            Allot = "allot",

            Fetch = "fetch",
            Store = "store",

            Array = "array",
            ArrayComma = "array_comma",
            ArrayEnd = "array_end",

            Itof = "itof",
            Utof = "utof",
            Ftoi = "ftoi",
            Ftou = "ftou",

            Getc = "getc",
            Geti = "geti",
            Getu = "getu",
            Getf = "getf",
            Gets = "gets",

            Putc = "putc",
            Puti = "puti",
            Putu = "putu",
            Putf = "putf",
            Puts = "puts",

            Show = "show",
        }
    };
}

macro_rules! opcode_enum {
    ($first:tt = $first_mnemonic:tt, $($name:tt = $mnemonic:tt),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $first = 1,
            $($name),*
        }

        impl Opcode {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    Self::$first => $first_mnemonic,
                    $(Self::$name => $mnemonic),*
                }
            }

            pub fn from_byte(byte: u8) -> Option<Self> {
                // Opcode numbering is dense, so a range check suffices.
                const LAST: u8 = {
                    let mut n = 1;
                    $(let _ = $mnemonic; n += 1;)*
                    n
                };
                (1..=LAST)
                    .contains(&byte)
                    .then(|| unsafe { std::mem::transmute::<u8, Opcode>(byte) })
            }
        }
    }
}

expand_opcodes!(opcode_enum);

impl Opcode {
    /// Whether the opcode is followed by an 8-byte little-endian operand in
    /// the wire format. Determined solely by the opcode.
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Self::Value
                | Self::If
                | Self::Jump
                | Self::For
                | Self::ForCheck
                | Self::ForNext
                | Self::Lambda
                | Self::Exec
                | Self::Datagroup
        )
    }

    /// Size of the encoded op in bytes.
    pub fn encoded_len(self) -> u64 {
        if self.has_operand() {
            9
        } else {
            1
        }
    }
}
