//! The compile-time dictionary of numeric element tags.

/// Dictionary tags (DTAGs) understood by this implementation.
///
/// The numbering is fixed by the wire protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum DTag {
    Any = 13,
    Name = 14,
    Component = 15,
    Certificate = 16,
    Collection = 17,
    CompleteName = 18,
    Content = 19,
    SignedInfo = 20,
    ContentDigest = 21,
    ContentHash = 22,
    ExperimentalResponseFilter = 23,
    Count = 24,
    Header = 25,
    Interest = 26,
    Key = 27,
    KeyLocator = 28,
    KeyName = 29,
    Length = 30,
    Link = 31,
    LinkAuthenticator = 32,
    NameComponentCount = 33,
    RootDigest = 36,
    Signature = 37,
    Start = 38,
    Timestamp = 39,
    Type = 40,
    Nonce = 41,
    Scope = 42,
    Exclude = 43,
    Bloom = 44,
    BloomSeed = 45,
    AnswerOriginKind = 47,
    InterestLifetime = 48,
    Witness = 53,
    SignatureBits = 54,
    DigestAlgorithm = 55,
    BlockSize = 56,
    FreshnessSeconds = 58,
    FinalBlockID = 59,
    PublisherPublicKeyDigest = 60,
    PublisherCertificateDigest = 61,
    PublisherIssuerKeyDigest = 62,
    PublisherIssuerCertificateDigest = 63,
    ContentObject = 64,
    WrappedKey = 65,
    WrappingKeyIdentifier = 66,
    WrapAlgorithm = 67,
    KeyAlgorithm = 68,
    Label = 69,
    EncryptedKey = 70,
    EncryptedNonceKey = 71,
    WrappingKeyName = 72,
    Action = 73,
    FaceID = 74,
    IPProto = 75,
    Host = 76,
    Port = 77,
    MulticastInterface = 78,
    ForwardingFlags = 79,
    FaceInstance = 80,
    ForwardingEntry = 81,
    MulticastTTL = 82,
    MinSuffixComponents = 83,
    MaxSuffixComponents = 84,
    ChildSelector = 85,
    RepositoryInfo = 86,
    Version = 87,
    RepositoryVersion = 88,
    GlobalPrefix = 89,
    LocalName = 90,
    Policy = 91,
    Namespace = 92,
    GlobalPrefixName = 93,
    PolicyVersion = 94,
    KeyValueSet = 95,
    KeyValuePair = 96,
    IntegerValue = 97,
    DecimalValue = 98,
    StringValue = 99,
    BinaryValue = 100,
    NameValue = 101,
    Entry = 102,
    ACL = 103,
    ParameterizedName = 104,
    Prefix = 105,
    Suffix = 106,
    Root = 107,
    ProfileName = 108,
    Parameters = 109,
    InfoString = 110,
    ExtOpt = 111,
    StatusResponse = 112,
    StatusCode = 113,
    StatusText = 114,
    SyncNode = 115,
    SyncNodeKind = 116,
    SyncNodeElement = 117,
    SyncVersion = 118,
    NamesElementCount = 119,
    LeavesElementCount = 120,
    BytesElementCount = 121,
    SyncConfigSlice = 122,
    SyncConfigSliceList = 123,
    SyncConfigSliceOp = 124,
    SequenceNumber = 256,
    CCNProtocolDataUnit = 17702112,
}

impl DTag {
    /// Look a dictionary tag up by its wire number.
    pub fn from_num(num: u64) -> Option<DTag> {
        use DTag::*;
        Some(match num {
            13 => Any,
            14 => Name,
            15 => Component,
            16 => Certificate,
            17 => Collection,
            18 => CompleteName,
            19 => Content,
            20 => SignedInfo,
            21 => ContentDigest,
            22 => ContentHash,
            23 => ExperimentalResponseFilter,
            24 => Count,
            25 => Header,
            26 => Interest,
            27 => Key,
            28 => KeyLocator,
            29 => KeyName,
            30 => Length,
            31 => Link,
            32 => LinkAuthenticator,
            33 => NameComponentCount,
            36 => RootDigest,
            37 => Signature,
            38 => Start,
            39 => Timestamp,
            40 => Type,
            41 => Nonce,
            42 => Scope,
            43 => Exclude,
            44 => Bloom,
            45 => BloomSeed,
            47 => AnswerOriginKind,
            48 => InterestLifetime,
            53 => Witness,
            54 => SignatureBits,
            55 => DigestAlgorithm,
            56 => BlockSize,
            58 => FreshnessSeconds,
            59 => FinalBlockID,
            60 => PublisherPublicKeyDigest,
            61 => PublisherCertificateDigest,
            62 => PublisherIssuerKeyDigest,
            63 => PublisherIssuerCertificateDigest,
            64 => ContentObject,
            65 => WrappedKey,
            66 => WrappingKeyIdentifier,
            67 => WrapAlgorithm,
            68 => KeyAlgorithm,
            69 => Label,
            70 => EncryptedKey,
            71 => EncryptedNonceKey,
            72 => WrappingKeyName,
            73 => Action,
            74 => FaceID,
            75 => IPProto,
            76 => Host,
            77 => Port,
            78 => MulticastInterface,
            79 => ForwardingFlags,
            80 => FaceInstance,
            81 => ForwardingEntry,
            82 => MulticastTTL,
            83 => MinSuffixComponents,
            84 => MaxSuffixComponents,
            85 => ChildSelector,
            86 => RepositoryInfo,
            87 => Version,
            88 => RepositoryVersion,
            89 => GlobalPrefix,
            90 => LocalName,
            91 => Policy,
            92 => Namespace,
            93 => GlobalPrefixName,
            94 => PolicyVersion,
            95 => KeyValueSet,
            96 => KeyValuePair,
            97 => IntegerValue,
            98 => DecimalValue,
            99 => StringValue,
            100 => BinaryValue,
            101 => NameValue,
            102 => Entry,
            103 => ACL,
            104 => ParameterizedName,
            105 => Prefix,
            106 => Suffix,
            107 => Root,
            108 => ProfileName,
            109 => Parameters,
            110 => InfoString,
            111 => ExtOpt,
            112 => StatusResponse,
            113 => StatusCode,
            114 => StatusText,
            115 => SyncNode,
            116 => SyncNodeKind,
            117 => SyncNodeElement,
            118 => SyncVersion,
            119 => NamesElementCount,
            120 => LeavesElementCount,
            121 => BytesElementCount,
            122 => SyncConfigSlice,
            123 => SyncConfigSliceList,
            124 => SyncConfigSliceOp,
            256 => SequenceNumber,
            17702112 => CCNProtocolDataUnit,
            _ => return None,
        })
    }
}
