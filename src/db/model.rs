/// 媒体注册记录
pub struct MediaRecord {
    /// 媒体 ID
    pub id: i64,
    /// 文件 blake3 哈希
    pub hash: Vec<u8>,
    /// 文件路径
    pub path: String,
    /// 媒体类型（image / video）
    pub kind: String,
}

/// 任务运行记录
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// 任务名
    pub job_name: String,
    /// 开始时间，毫秒
    pub start_time: i64,
    /// 结束时间，毫秒
    pub finish_time: i64,
    /// 本次运行处理的数量
    pub processed_count: i64,
    /// 是否成功
    pub is_success: bool,
}

/// 原型记录，质心为所属样本嵌入的逐元素平均
#[derive(Debug, Clone)]
pub struct PrototypeRecord {
    pub id: i64,
    /// 唯一名称
    pub name: String,
    /// 质心向量
    pub centroid: Vec<f32>,
    /// 所属样本数量
    pub sample_count: i64,
    pub color: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 原型样本记录
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub id: i64,
    /// 所属原型 ID
    pub prototype_id: i64,
    /// 样本来源 URI
    pub source_uri: String,
    /// 裁剪区域，JSON 字符串
    pub crop_rect: String,
    /// 样本嵌入
    pub embedding: Vec<f32>,
    pub added_at: i64,
    pub thumbnail_path: Option<String>,
}

/// 标签记录
#[derive(Debug, Clone)]
pub struct TagRecord {
    /// 唯一名称
    pub name: String,
    pub description: String,
    /// 标签嵌入
    pub embedding: Vec<f32>,
    /// 自动打标的相似度阈值
    pub threshold: f32,
    pub is_active: bool,
}

/// 媒体与标签的关联
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTagAssignment {
    pub media_id: i64,
    pub tag_name: String,
    /// 相似度置信度
    pub confidence: f32,
    /// 是否为用户手动指定
    pub is_user_assigned: bool,
}
