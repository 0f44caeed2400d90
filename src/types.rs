// Managed references are tagged words. Every tag keeps bit 0 clear so
// that structures living on the heap (tree nodes) can borrow that bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BuiltInTypes {
    Int,
    Null,
    HeapObject,
}

impl BuiltInTypes {
    pub const TAG_MASK: usize = 0b111;

    pub fn null_value() -> isize {
        0b010
    }

    pub fn tag(&self, value: isize) -> isize {
        let value = value << 3;
        let tag = self.get_tag();
        value | tag
    }

    pub fn get_tag(&self) -> isize {
        match self {
            BuiltInTypes::Int => 0b000,
            BuiltInTypes::Null => 0b010,
            BuiltInTypes::HeapObject => 0b110,
        }
    }

    pub fn untag(value: usize) -> usize {
        value >> 3
    }

    pub fn untag_isize(value: isize) -> isize {
        value >> 3
    }

    pub fn get_kind(pointer: usize) -> Self {
        match pointer & Self::TAG_MASK {
            0b000 => BuiltInTypes::Int,
            0b010 => BuiltInTypes::Null,
            0b110 => BuiltInTypes::HeapObject,
            tag => panic!("Invalid tag {:#05b} on value {:#x}", tag, pointer),
        }
    }

    pub fn construct_int(value: isize) -> isize {
        if value > isize::MAX >> 3 || value < isize::MIN >> 3 {
            panic!(
                "Integer overflow: {} does not fit in a tagged integer",
                value
            )
        }
        BuiltInTypes::Int.tag(value)
    }

    pub fn is_null(value: usize) -> bool {
        value == Self::null_value() as usize
    }

    pub fn is_heap_pointer(value: usize) -> bool {
        value & Self::TAG_MASK == 0b110
    }
}

#[test]
fn tag_and_untag() {
    for kind in [BuiltInTypes::Int, BuiltInTypes::HeapObject] {
        let value = 123;
        let tagged = kind.tag(value);
        assert_eq!(kind, BuiltInTypes::get_kind(tagged as usize));
        assert_eq!(value as usize, BuiltInTypes::untag(tagged as usize));
        assert_eq!(tagged & 1, 0);
    }
    assert_eq!(
        BuiltInTypes::get_kind(BuiltInTypes::null_value() as usize),
        BuiltInTypes::Null
    );
    assert_eq!(BuiltInTypes::untag_isize(BuiltInTypes::construct_int(-7)), -7);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    pub type_id: u8,
    pub size: u32, // Size in words, not counting the header
}

impl Header {
    // | Byte 7  | Bytes 5-6 | Bytes 1-4 | Byte 0                  |
    // |---------|-----------|-----------|-------------------------|
    // | Type    | unused    | Size      | [reserved: fwd bit] (3) |
    //
    // Bits 0-2 are always zero so a header can never be mistaken for a
    // tagged heap pointer. Bit 3 is the forwarding marker: while the
    // collector runs, a copied object's header word is overwritten with
    // its new tagged pointer with bit 3 set. Tagged pointers are
    // `address << 3 | tag` with 8-byte aligned addresses, so bit 3 is
    // always zero in a real pointer.

    const FORWARDING_BIT_POSITION: u32 = 3;

    pub fn to_usize(self) -> usize {
        let mut data: usize = 0;
        data |= (self.type_id as usize) << 56;
        data |= (self.size as usize) << 8;
        data
    }

    pub fn from_usize(data: usize) -> Self {
        Header {
            type_id: (data >> 56) as u8,
            size: ((data >> 8) & 0xFFFF_FFFF) as u32,
        }
    }

    pub const fn forwarding_bit_mask() -> usize {
        1 << Self::FORWARDING_BIT_POSITION
    }

    pub const fn set_forwarding_bit(tagged_pointer: usize) -> usize {
        tagged_pointer | Self::forwarding_bit_mask()
    }

    pub const fn clear_forwarding_bit(tagged_pointer: usize) -> usize {
        tagged_pointer & !Self::forwarding_bit_mask()
    }

    pub const fn is_forwarding_bit_set(value: usize) -> bool {
        (value & Self::forwarding_bit_mask()) != 0
    }
}


// A view over a raw heap object. Does not keep anything alive: the
// address is only meaningful until the next collection.
pub struct HeapObject {
    pointer: usize,
    tagged: bool,
}

impl HeapObject {
    pub const HEADER_SIZE: usize = 8;

    pub fn from_tagged(pointer: usize) -> Self {
        assert!(
            BuiltInTypes::is_heap_pointer(pointer),
            "Not a heap pointer: {:#x}",
            pointer
        );
        assert!(
            BuiltInTypes::untag(pointer).is_multiple_of(8),
            "Misaligned heap pointer: tagged={:#x}, untagged={:#x}",
            pointer,
            BuiltInTypes::untag(pointer)
        );
        HeapObject {
            pointer,
            tagged: true,
        }
    }

    pub fn from_untagged(pointer: *const u8) -> Self {
        assert!((pointer as usize).is_multiple_of(8));
        HeapObject {
            pointer: pointer as usize,
            tagged: false,
        }
    }

    pub fn untagged(&self) -> usize {
        if self.tagged {
            BuiltInTypes::untag(self.pointer)
        } else {
            self.pointer
        }
    }

    pub fn tagged_pointer(&self) -> usize {
        if self.tagged {
            self.pointer
        } else {
            BuiltInTypes::HeapObject.tag(self.pointer as isize) as usize
        }
    }

    pub fn get_pointer(&self) -> *const u8 {
        self.untagged() as *const u8
    }

    pub fn header_word(&self) -> usize {
        let pointer = self.untagged() as *const usize;
        unsafe { *pointer }
    }

    pub fn write_header_word(&self, data: usize) {
        let pointer = self.untagged() as *mut usize;
        unsafe { *pointer = data };
    }

    pub fn get_header(&self) -> Header {
        Header::from_usize(self.header_word())
    }

    pub fn write_header(&mut self, type_id: u8, size: Word) {
        self.write_header_word(
            Header {
                type_id,
                size: size.to_words() as u32,
            }
            .to_usize(),
        );
    }

    pub fn get_type_id(&self) -> u8 {
        self.get_header().type_id
    }

    pub fn fields_size(&self) -> usize {
        Word::from_word(self.get_header().size as usize).to_bytes()
    }

    pub fn field_count(&self) -> usize {
        self.get_header().size as usize
    }

    pub fn full_size(&self) -> usize {
        self.fields_size() + Self::HEADER_SIZE
    }

    pub fn get_field(&self, index: usize) -> usize {
        debug_assert!(index < self.field_count());
        let pointer = self.untagged() as *const usize;
        unsafe { *pointer.add(index + 1) }
    }

    pub fn write_field(&self, index: usize, value: usize) {
        debug_assert!(index < self.field_count());
        let pointer = self.untagged() as *mut usize;
        unsafe { *pointer.add(index + 1) = value };
    }

    pub fn get_fields(&self) -> &[usize] {
        let pointer = self.untagged() as *const usize;
        unsafe { std::slice::from_raw_parts(pointer.add(1), self.field_count()) }
    }

    pub fn get_fields_mut(&mut self) -> &mut [usize] {
        let pointer = self.untagged() as *mut usize;
        unsafe { std::slice::from_raw_parts_mut(pointer.add(1), self.field_count()) }
    }

    pub fn get_full_object_data(&self) -> &[u8] {
        let size = self.full_size();
        let pointer = self.untagged() as *const u8;
        assert!(pointer.is_aligned());
        unsafe { std::slice::from_raw_parts(pointer, size) }
    }

    /// The tagged address this object was moved to, if the collector has
    /// already copied it.
    pub fn forwarded_to(&self) -> Option<usize> {
        let header = self.header_word();
        if Header::is_forwarding_bit_set(header) {
            Some(Header::clear_forwarding_bit(header))
        } else {
            None
        }
    }

    pub fn forward_to(&self, tagged_new: usize) {
        self.write_header_word(Header::set_forwarding_bit(tagged_new));
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Word(usize);

impl Word {
    pub fn to_bytes(self) -> usize {
        self.0 * 8
    }

    pub fn from_word(size: usize) -> Word {
        Word(size)
    }

    pub fn to_words(self) -> usize {
        self.0
    }
}
