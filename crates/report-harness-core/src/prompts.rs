//! Prompt builders.
//!
//! Every LLM call the pipeline makes is built here so the wording lives in
//! one place. Prompts are Chinese; the parsers in [`crate::parse`] depend on
//! the markers these prompts ask for (`段落名称为：`, `解析后的报告模版：`,
//! `[段落内容]`, `表格名称为`, `表格正文如下:`), so change both together.

use crate::llm::ChatRequest;
use crate::parse::{
    CONTENT_MARKER, NAMES_MARKER, REASONING_MARKER, TABLE_BODY_MARKER, TABLE_NAME_MARKER,
    TEMPLATE_MARKER, WRITE_ITEMS_MARKER,
};

/// Flag the model must put in front of passages drawn from its own knowledge.
pub const OWN_KNOWLEDGE_FLAG: &str = "根据我已有经验......";

/// Flag for passages that need external material added by a person.
pub const EXTERNAL_KNOWLEDGE_FLAG: &str =
    "需外部知识补充，请具体再由人工补充一下，需要补充完整如下内容框架：XXXXXXX";

/// System prompt shared by domain-expert calls.
pub fn expert_system(domain: &str) -> String {
    format!("你是一名资深的{}领域专家，拥有超过15年的行业经验。", domain)
}

/// Draft a hierarchical outline for `title`.
pub fn outline_request(domain: &str, requirements: &str, title: &str, temperature: f32) -> ChatRequest {
    let system = format!(
        r#"[角色]:你是一名资深的{domain}领域专家，拥有超过15年的行业经验。
[任务]:作为一名专业人士，你的工作是首先理解用户的需求{requirements}，然后帮助用户撰写报告框架目录，具体按照[目录要求]写。
[目录要求]：
   ---各级序号从大到小为:1、  1.1、   1.1.1、   1.1.1.1、   1.1.1.1.1，目录一般不超过五级；
   ---目录示例：1\经营分析  1.1\财务分析  1.1.1\利润分析；
   ---在每个最下级目录下，写本目录主要撰写哪几点内容，以"{items}"为开始，具体参考[目录模板]
[目录模板]：
    1\总述
       1.1\报告目的与背景
       {items}报告撰写的目的、报告撰写的背景
       1.2\报告时间范围与数据来源
       {items}描述本次报告属于哪个经营期间，以及相关数据从哪里获取
       1.3\公司概述
       {items}公司成立时间、人数、所属行业等基本情况
    2\经营概况
       2.1\经营成果概述
          2.1.1\主要财务数据概览
          {items}利润总额、营业收入、成本
          2.1.2\主要经营指标概览
          {items}xx区域销售回款、重大项目进度情况
    ......"#,
        domain = domain,
        requirements = requirements,
        items = WRITE_ITEMS_MARKER,
    );
    let user = format!(
        "请根据标题{}，撰写报告框架目录。要求：直接输出框架目录，不要输出任何与框架目录无关的文字。",
        title
    );
    ChatRequest::new(system, user, temperature)
}

/// Turn an outline into paragraph names plus an annotated template.
pub fn scheme_parse_request(domain: &str, outline: &str, temperature: f32) -> ChatRequest {
    let user = format!(
        r#"你的任务是根据专业报告的框架{outline}，针对每个报告的段落，生成解析语句，详见[解析要求]，参考[解析示例]。
[解析要求]：
 ---报告框架中每个“{items}”字样后的话，根据上下文意思解析为一个或多个段落。
 ---以“{names}”开始，每个段落名称用“,”分割，结束后不要加任何标点符号。
 ---解析的段落名称要根据上下文语义补充成完整的名称，即使单看段落名，也表述完整。例如：人口情况，可以根据上下文解析为经开区人口情况。补充完整的目的是为了根据段落名进行知识检索。
 ---全部段落解析完后，增加解析后的报告模版：在原模版中，把“{items}”字样去掉，保留每个段落名称，每个段落名称后面增加“{{段落名称}}”，以“{template}”为开头，换行输出。
 ---直接输出段落解析内容和解析后的报告模版，不要说其他任何废话。

[解析示例]：
报告框架如下：
1\总述
   1.1\报告目的与背景
   {items}报告撰写的目的、报告撰写的背景
   1.2\区域概述
   {items}郑州经济开发区的地理位置、面积、人口
2\发展现状分析
   2.1\经济基础分析
      2.1.1\GDP及增长率
      {items}近年GDP总量及增长率

对上面报告框架的解析如下：
{names}
报告撰写的目的,报告撰写的背景,郑州经济开发区的地理位置,郑州经济开发区的面积,郑州经济开发区的人口,郑州经济开发区近年GDP总量,郑州经济开发区近年GDP增长率

{template}
1\总述
   1.1\报告目的与背景
   报告撰写的目的{{报告撰写的目的}}、报告撰写的背景{{报告撰写的背景}}
   1.2\区域概述
   郑州经济开发区的地理位置{{郑州经济开发区的地理位置}}、郑州经济开发区的面积{{郑州经济开发区的面积}}、郑州经济开发区的人口{{郑州经济开发区的人口}}
2\发展现状分析
   2.1\经济基础分析
      2.1.1\GDP及增长率
      郑州经济开发区近年GDP总量{{郑州经济开发区近年GDP总量}}、郑州经济开发区近年GDP增长率{{郑州经济开发区近年GDP增长率}}"#,
        outline = outline,
        items = WRITE_ITEMS_MARKER,
        names = NAMES_MARKER,
        template = TEMPLATE_MARKER,
    );
    ChatRequest::new(expert_system(domain), user, temperature)
}

/// Write the paragraph for one placeholder, grounded on retrieved text.
pub fn paragraph_request(
    domain: &str,
    title: &str,
    template: &str,
    name: &str,
    retrieved: &str,
    temperature: f32,
) -> ChatRequest {
    let user = format!(
        r#"[任务]
你的任务是根据专业报告主题{title}，结合专业报告的整体大纲{template}，完成专业报告段落{name}的内容的编写。
[技能]
    ---数据分析：从数据中提炼关键洞察并进行深入分析。
    ---深度洞察：识别领域中的问题与亮点，并提出专业意见和评论。
[思考过程]
[目标]："<段落标题>"；
[思考]："<
**思考步骤1：步骤名称**
对段落标题的详细思考和分析；
**思考步骤2：步骤名称**
完成标题内容需要的数据分析、供参考的检索的知识是否充足，不足的部分你的自有知识是否充足，需要从外部补充哪些额外知识
**最终思考**
最终的结果或结论>"
[编写要求]
    ---请结合检索已知的{retrieved}内容；
    ---必要时可根据你自己的知识，在使用你自有的知识时，需标明'{own}'，并将这些字体加黑、斜体显示；
    ---针对缺少数据的内容，可以列好表格，将数据空着；
    ---针对需要补充外部知识的地方，可以标明“{external}”
    ---请不要写大概、可能等模棱两可的语句；
    ---以专业报告，正向行文的风格写。
[输出]
你“必须”在每个输出前展示你的思考过程，格式为：以{reasoning}为开始，具体思考内容换行后输出。
你“必须”以{content}为开始，具体段落内容编写换行后输出。"#,
        title = title,
        template = template,
        name = name,
        retrieved = retrieved,
        own = OWN_KNOWLEDGE_FLAG,
        external = EXTERNAL_KNOWLEDGE_FLAG,
        reasoning = REASONING_MARKER,
        content = CONTENT_MARKER,
    );
    ChatRequest::new(expert_system(domain), user, temperature)
}

/// Optimize one window of the draft in the context of the whole report.
pub fn optimize_request(
    domain: &str,
    title: &str,
    requirements: &str,
    draft: &str,
    optimized_so_far: &str,
    window: &str,
    temperature: f32,
) -> ChatRequest {
    let user = format!(
        r#"[任务]
你的任务是根据专业报告主题{title}，结合对专业报告的要求{requirements}，根据专业报告整体内容{draft}和已经完成的优化内容{optimized}，继续完成对专业报告后续部分内容{window}的优化。
[技能]
    ---文字表达：精准的文字表达能力，能对报告进行精确表达。
    ---数据分析：从数据中提炼关键洞察并进行深入分析。
    ---深度洞察：识别领域中的问题与亮点，并提出专业意见和评论。
[优化要求]
    ---以专业报告，正向行文的风格写。
    ---去除多余的空格，换行，空行等无效字符。
    ---对表达重复的地方进行去重。
    ---对前后矛盾的地方进行统一。
    ---对欠缺的部分进行补充。
    ---必要时可以修改各级标题。
    ---对各级标题下没有内容、缺乏必要连接过渡的地方补充适当文字进行连接，确保文章的连贯性。
    ---对以下情况进行加黑、斜体表注，提示人工进行确认和修订：
       1.标明'{own}'的地方；
       2.缺少数据的内容和表格，将数据继续空着，并将这些地方的上文加黑、斜体显示；
       3.标明“{external}”的地方。
    ---只输出优化后的这部分内容，不要重复已经完成的优化内容。"#,
        title = title,
        requirements = requirements,
        draft = draft,
        optimized = optimized_so_far,
        window = window,
        own = OWN_KNOWLEDGE_FLAG,
        external = EXTERNAL_KNOWLEDGE_FLAG,
    );
    ChatRequest::new(expert_system(domain), user, temperature)
}

/// Answer a question from retrieved knowledge-base text.
pub fn rag_answer_request(domain: &str, question: &str, retrieved: &str, temperature: f32) -> ChatRequest {
    let user = format!(
        r#"你的任务是根据{retrieved}内容，回答{question}的问题，具体回复见[回复要求]。
[回复要求]：
 ---请严格按照检索到的内容回答问题；
 ---必要时可根据你自己的知识回答问题，在使用你自有的知识时，需标明'{own}'，并将这些字体加黑、斜体显示；
 ---请不要回复大概、可能等模棱两可的答案。"#,
        retrieved = retrieved,
        question = question,
        own = OWN_KNOWLEDGE_FLAG,
    );
    ChatRequest::new(expert_system(domain), user, temperature)
}

/// Strip PDF conversion artifacts from extracted text.
pub fn pdf_cleanup_request(text: &str, temperature: f32) -> ChatRequest {
    let system = "你是一名资深的文档处理专家，拥有超过15年的文档审查经验。";
    let user = format!(
        r#"[任务]: 你要优化的文档{text}是从pdf转换过来的，保留了原来pdf的一些痕迹。你的任务是去除文档中与内容无关的页码、页眉、页脚等从PDF转换时带来的与文章内容不相关的东西，返回文章原始内容。返回的文档见[输出要求]。
[输出要求]：
 ---直接输出文档内容，仅返回文档内容，不要输出不是文档内容的任何话；
 ---仅可去除与内容无关的东西，返回文章原始内容；
 ---如因PDF转换原因造成文字段落分散，可以根据意思，将前后挨着的不同段落的相同内容放在一个段落，但是原文章句子的顺序不得改变，不要有任何文字的修改。"#,
        text = text
    );
    ChatRequest::new(system, user, temperature)
}

/// Instruction sent with a table image to the vision model.
pub fn table_extract_prompt() -> String {
    format!(
        "请描述这个图片，识别图片中的每个表格，每个表格请以'{name}xxxx\\n\\n'的方式返回表格名称，以'{body}\\n'开始，以csv的格式输出表格正文，表格正文结束后添加'\\n\\n'结尾",
        name = TABLE_NAME_MARKER,
        body = TABLE_BODY_MARKER,
    )
}

/// Worked example for [`table_interpret_request`].
pub const TABLE_INTERPRET_EXAMPLE: &str = r#"表格名称: 技术记录表
时间, 人员名字, 测量次数, 备注
2020.1.10, 张三, 1212,
2020.1.15, 李四, 2,
2020.2.3, 王五, 34,
2020.2.18, 赵六, 6,
表格说明：
这张表是记录了单位人员技术测量内容，主要记录了测量时间、人员姓名，测量次数等信息。
经分析，共测量四次。时间角度看，1月测量2次，2月测量2次；测量人员共四人，每人测量一次，测量次数最多的是张三，测量1212次，测量次数最少的是李四测量2次。人员测量次数差异较大，每次测量次数波动较大，相关趋势不明显。"#;

/// Describe and analyse a table rendered as text.
pub fn table_interpret_request(table: &str, background: &str, temperature: f32) -> ChatRequest {
    let system = "你是数据分析专家，拥有超过15年的数据分析经验，具备数据对比分析、趋势分析等各类数据分析能力。";
    let user = format!(
        "你的工作任务是对{table}进行描述和解读，这个表格的背景是{background}。解读要求为：首先列示表格，其次对表格表达的内容背景进行综合阐述，然后根据表格内容进行详细说明，最后根据表格数据特点进行分析描述。具体可参考解读示例：\n{example}",
        table = table,
        background = background,
        example = TABLE_INTERPRET_EXAMPLE,
    );
    ChatRequest::new(system, user, temperature)
}
