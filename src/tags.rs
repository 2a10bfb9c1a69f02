//! Abstractions over TIFF tag ids and the namespaces they live in.

macro_rules! tags {
    {
        // Permit arbitrary meta items, which include documentation.
        $( #[$enum_attr:meta] )*
        $vis:vis enum $name:ident($ty:tt) $(unknown(#[$unknown_meta:meta] $unknown_doc:ident))* {
            // Each of the `Name = Val,` permitting documentation.
            $($(#[$ident_attr:meta])* $tag:ident = $val:expr,)*
        }
    } => {
        $( #[$enum_attr] )*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $($(#[$ident_attr])* $tag,)*
            $(
                #[$unknown_meta]
                Unknown($ty),
            )*
        }

        impl $name {
            #[inline(always)]
            fn __from_inner_type(n: $ty) -> Result<Self, $ty> {
                match n {
                    $( $val => Ok($name::$tag), )*
                    n => Err(n),
                }
            }

            #[inline(always)]
            fn __to_inner_type(&self) -> $ty {
                match *self {
                    $( $name::$tag => $val, )*
                    $( $name::Unknown($unknown_doc) => { $unknown_doc }, )*
                }
            }

            /// The canonical name of this value, if it has one.
            pub fn name(&self) -> Option<&'static str> {
                match *self {
                    $( $name::$tag => Some(stringify!($tag)), )*
                    $( $name::Unknown($unknown_doc) => { let _ = $unknown_doc; None }, )*
                }
            }

            /// Resolve a value from its canonical name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( stringify!($tag) => Some($name::$tag), )*
                    _ => None,
                }
            }
        }

        tags!($name, $ty, $($unknown_doc)*);
    };
    // For u16 tags, provide direct inherent primitive conversion methods.
    ($name:tt, u16, $($unknown_doc:ident)*) => {
        impl $name {
            #[inline(always)]
            pub fn from_u16(val: u16) -> Option<Self> {
                Self::__from_inner_type(val).ok()
            }

            $(
            #[inline(always)]
            pub fn from_u16_exhaustive($unknown_doc: u16) -> Self {
                Self::__from_inner_type($unknown_doc).unwrap_or_else(|_| $name::Unknown($unknown_doc))
            }
            )*

            #[inline(always)]
            pub fn to_u16(&self) -> u16 {
                Self::__to_inner_type(self)
            }
        }
    };
    // For other tag types, do nothing for now. With concat_idents one could
    // provide inherent conversion methods for all types.
    ($name:tt, $ty:tt, $($unknown_doc:literal)*) => {};
}

tags! {
/// Tags of the baseline and extension TIFF namespaces, plus the vendor tags
/// that matter for slide formats.
pub enum Tag(u16) unknown(
    /// A private or extension tag
    unknown
) {
    // Baseline tags:
    NewSubfileType = 254,
    SubfileType = 255,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    Threshholding = 263,
    CellWidth = 264,
    CellLength = 265,
    FillOrder = 266,
    DocumentName = 269,
    ImageDescription = 270,
    Make = 271,
    Model = 272,
    StripOffsets = 273,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    MinSampleValue = 280,
    MaxSampleValue = 281,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    PageName = 285,
    XPosition = 286,
    YPosition = 287,
    FreeOffsets = 288,
    FreeByteCounts = 289,
    GrayResponseUnit = 290,
    GrayResponseCurve = 291,
    T4Options = 292,
    T6Options = 293,
    ResolutionUnit = 296,
    PageNumber = 297,
    TransferFunction = 301,
    Software = 305,
    DateTime = 306,
    Artist = 315,
    HostComputer = 316,
    // Advanced tags
    Predictor = 317,
    WhitePoint = 318,
    PrimaryChromaticities = 319,
    ColorMap = 320,
    HalftoneHints = 321,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    SubIfd = 330,
    InkSet = 332,
    InkNames = 333,
    NumberOfInks = 334,
    DotRange = 336,
    TargetPrinter = 337,
    ExtraSamples = 338,
    // Data Sample Format
    SampleFormat = 339,
    SMinSampleValue = 340,
    SMaxSampleValue = 341,
    // JPEG
    JPEGTables = 347,
    YCbCrCoefficients = 529,
    YCbCrSubSampling = 530,
    YCbCrPositioning = 531,
    ReferenceBlackWhite = 532,
    XMP = 700,
    // <https://web.archive.org/web/20131111073619/http://www.exif.org/Exif2-1.PDF>
    // *Do note its typo in the Decimal id*
    Copyright = 33_432,
    // GeoTIFF
    ModelPixelScale = 33550, // (SoftDesk)
    IPTC = 33723,
    ModelTiepoint = 33922, // (Intergraph)
    ModelTransformation = 34264, // (JPL Carto Group)
    Photoshop = 34377,
    // <https://web.archive.org/web/20131111073619/http://www.exif.org/Exif2-1.PDF>
    ExifIfd = 0x8769,
    // <https://www.color.org/technotes/ICC-Technote-ProfileEmbedding.pdf>
    IccProfile = 34675,
    GeoKeyDirectory = 34735, // (SPOT)
    GeoDoubleParams = 34736, // (SPOT)
    GeoAsciiParams = 34737, // (SPOT)
    GpsIfd = 0x8825,
    GdalNodata = 42113, // Contains areas with missing data
    // ImageJ writes its hyperstack state into a pair of private tags.
    ImageJMetadataByteCounts = 50838,
    ImageJMetadata = 50839,
    // Hamamatsu NDPI files masquerade as plain TIFF; this tag gives them away.
    NdpiFormatFlag = 65420,
}
}

tags! {
/// Tags of the GPS IFD namespace.
pub enum GpsTag(u16) unknown(
    /// A private or extension tag
    unknown
) {
    GPSVersionID = 0,
    GPSLatitudeRef = 1,
    GPSLatitude = 2,
    GPSLongitudeRef = 3,
    GPSLongitude = 4,
    GPSAltitudeRef = 5,
    GPSAltitude = 6,
    GPSTimeStamp = 7,
    GPSSatellites = 8,
    GPSStatus = 9,
    GPSMeasureMode = 10,
    GPSDOP = 11,
    GPSSpeedRef = 12,
    GPSSpeed = 13,
    GPSTrackRef = 14,
    GPSTrack = 15,
    GPSImgDirectionRef = 16,
    GPSImgDirection = 17,
    GPSMapDatum = 18,
    GPSDestLatitudeRef = 19,
    GPSDestLatitude = 20,
    GPSDestLongitudeRef = 21,
    GPSDestLongitude = 22,
    GPSDestBearingRef = 23,
    GPSDestBearing = 24,
    GPSDestDistanceRef = 25,
    GPSDestDistance = 26,
    GPSProcessingMethod = 27,
    GPSAreaInformation = 28,
    GPSDateStamp = 29,
    GPSDifferential = 30,
}
}

tags! {
/// Tags of the EXIF IFD namespace.
pub enum ExifTag(u16) unknown(
    /// A private or extension tag
    unknown
) {
    ExposureTime = 33434,
    FNumber = 33437,
    ExposureProgram = 34850,
    SpectralSensitivity = 34852,
    ISOSpeedRatings = 34855,
    ExifVersion = 0x9000,
    DateTimeOriginal = 0x9003,
    DateTimeDigitized = 0x9004,
    ComponentsConfiguration = 0x9101,
    CompressedBitsPerPixel = 0x9102,
    ShutterSpeedValue = 0x9201,
    ApertureValue = 0x9202,
    BrightnessValue = 0x9203,
    ExposureBiasValue = 0x9204,
    MaxApertureValue = 0x9205,
    SubjectDistance = 0x9206,
    MeteringMode = 0x9207,
    LightSource = 0x9208,
    Flash = 0x9209,
    FocalLength = 0x920A,
    MakerNote = 0x927C,
    UserComment = 0x9286,
    SubSecTime = 0x9290,
    SubSecTimeOriginal = 0x9291,
    SubSecTimeDigitized = 0x9292,
    FlashpixVersion = 0xA000,
    ColorSpace = 0xA001,
    PixelXDimension = 0xA002,
    PixelYDimension = 0xA003,
    InteroperabilityIfd = 0xA005,
    FocalPlaneXResolution = 0xA20E,
    FocalPlaneYResolution = 0xA20F,
    FocalPlaneResolutionUnit = 0xA210,
    SensingMethod = 0xA217,
    FileSource = 0xA300,
    SceneType = 0xA301,
    CustomRendered = 0xA401,
    ExposureMode = 0xA402,
    WhiteBalance = 0xA403,
    DigitalZoomRatio = 0xA404,
    FocalLengthIn35mmFilm = 0xA405,
    SceneCaptureType = 0xA406,
    ImageUniqueID = 0xA420,
    BodySerialNumber = 0xA431,
    LensSerialNumber = 0xA435,
}
}

tags! {
/// The type of an IFD entry (a 2 byte field).
pub enum Type(u16) {
    /// 8-bit unsigned integer
    BYTE = 1,
    /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
    ASCII = 2,
    /// 16-bit unsigned integer
    SHORT = 3,
    /// 32-bit unsigned integer
    LONG = 4,
    /// Fraction stored as two 32-bit unsigned integers
    RATIONAL = 5,
    /// 8-bit signed integer
    SBYTE = 6,
    /// 8-bit byte that may contain anything, depending on the field
    UNDEFINED = 7,
    /// 16-bit signed integer
    SSHORT = 8,
    /// 32-bit signed integer
    SLONG = 9,
    /// Fraction stored as two 32-bit signed integers
    SRATIONAL = 10,
    /// 32-bit IEEE floating point
    FLOAT = 11,
    /// 64-bit IEEE floating point
    DOUBLE = 12,
    /// 32-bit unsigned integer (offset)
    IFD = 13,
    /// BigTIFF 64-bit unsigned integer
    LONG8 = 16,
    /// BigTIFF 64-bit signed integer
    SLONG8 = 17,
    /// BigTIFF 64-bit unsigned integer (offset)
    IFD8 = 18,
}
}

impl Type {
    /// The size in bytes of one element of this type.
    pub fn size(self) -> usize {
        match self {
            Type::BYTE | Type::SBYTE | Type::ASCII | Type::UNDEFINED => 1,
            Type::SHORT | Type::SSHORT => 2,
            Type::LONG | Type::SLONG | Type::FLOAT | Type::IFD => 4,
            Type::LONG8 | Type::SLONG8 | Type::IFD8 | Type::DOUBLE => 8,
            Type::RATIONAL | Type::SRATIONAL => 8,
        }
    }
}

/// Bits of the `NewSubfileType` bitmask.
pub mod subfile_type {
    pub const REDUCED_IMAGE: u32 = 1;
    pub const PAGE: u32 = 2;
    pub const MASK: u32 = 4;
    pub const MACRO: u32 = 8;
}

/// The namespace in which a tag id is interpreted.
///
/// Sub-IFD pointer tags switch the namespace for the directories they point
/// at: entries of a GPS IFD are looked up in [`GpsTag`], not [`Tag`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TagSet {
    Baseline,
    Exif,
    Gps,
}

// Alternate spellings seen in the wild; rule files may use either the
// canonical or the alternate name.
const ALT_NAMES: &[(&str, Tag)] = &[
    ("ImageHeight", Tag::ImageLength),
    ("TileHeight", Tag::TileLength),
    ("Photometric", Tag::PhotometricInterpretation),
    ("InterColorProfile", Tag::IccProfile),
    ("ICCProfile", Tag::IccProfile),
    ("SubIFD", Tag::SubIfd),
    ("SubIFDs", Tag::SubIfd),
    ("EXIFIFD", Tag::ExifIfd),
    ("GPSIFD", Tag::GpsIfd),
];

impl TagSet {
    /// The canonical name of a tag id within this namespace.
    pub fn primary_name(self, id: u16) -> Option<&'static str> {
        match self {
            TagSet::Baseline => Tag::from_u16(id).and_then(|t| t.name()),
            TagSet::Exif => ExifTag::from_u16(id).and_then(|t| t.name()),
            TagSet::Gps => GpsTag::from_u16(id).and_then(|t| t.name()),
        }
    }

    /// All names a tag id answers to within this namespace, canonical first.
    pub fn names(self, id: u16) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.primary_name(id).into_iter().collect();
        if self == TagSet::Baseline {
            names.extend(
                ALT_NAMES
                    .iter()
                    .filter(|(_, tag)| tag.to_u16() == id)
                    .map(|(name, _)| *name),
            );
        }
        names
    }

    /// Whether `id` with entry type `type_` points at nested IFDs.
    pub fn is_ifd_pointer(self, id: u16, type_: Type) -> bool {
        if matches!(type_, Type::IFD | Type::IFD8) {
            return true;
        }
        match self {
            TagSet::Baseline => matches!(
                Tag::from_u16(id),
                Some(Tag::SubIfd | Tag::ExifIfd | Tag::GpsIfd)
            ),
            TagSet::Exif => matches!(ExifTag::from_u16(id), Some(ExifTag::InteroperabilityIfd)),
            TagSet::Gps => false,
        }
    }

    /// The namespace of the IFDs a pointer tag refers to.
    pub fn pointed_set(self, id: u16) -> TagSet {
        match (self, Tag::from_u16(id)) {
            (TagSet::Baseline, Some(Tag::ExifIfd)) => TagSet::Exif,
            (TagSet::Baseline, Some(Tag::GpsIfd)) => TagSet::Gps,
            (TagSet::Exif, _) => TagSet::Exif,
            _ => TagSet::Baseline,
        }
    }

    /// A human readable rendering of a tag id, used in reports and logs.
    pub fn describe(self, id: u16) -> String {
        match self.primary_name(id) {
            Some(name) => name.to_string(),
            None => format!("Tag {id} (0x{id:04X})"),
        }
    }
}

/// Resolve a rule-file key to the tag id it names.
///
/// Names are looked up first in the baseline namespace, then GPS, then EXIF.
/// Purely numeric keys (decimal or `0x`-prefixed hex) name a tag directly.
pub fn lookup_tag(name: &str) -> Option<(TagSet, u16)> {
    if let Some(tag) = Tag::from_name(name) {
        return Some((TagSet::Baseline, tag.to_u16()));
    }
    if let Some((_, tag)) = ALT_NAMES.iter().find(|(alt, _)| *alt == name) {
        return Some((TagSet::Baseline, tag.to_u16()));
    }
    if let Some(tag) = GpsTag::from_name(name) {
        return Some((TagSet::Gps, tag.to_u16()));
    }
    if let Some(tag) = ExifTag::from_name(name) {
        return Some((TagSet::Exif, tag.to_u16()));
    }
    let id = if let Some(hex) = name.strip_prefix("0x") {
        u16::from_str_radix(hex, 16).ok()?
    } else {
        name.parse::<u16>().ok()?
    };
    Some((TagSet::Baseline, id))
}
